//! One assembled Newton step on a node-parameter dependent field.
//!
//! The objective fields are first folded into a single scalar field. Its
//! first and second derivatives with respect to the dependent field's node
//! parameters are assembled element by element over the highest-dimension
//! non-empty mesh into a global gradient and Hessian, the Newton system is
//! solved by LU factorisation and the increment is added to the stored
//! parameters. There is no line search and no second step; callers wanting
//! further progress call again.

use log::warn;
use nalgebra::DVector;

use super::OptimizationError;
use crate::fields::{ElementId, Field, FieldCache, Region};
use crate::matrix::{Factor, Matrix};

pub(crate) struct NewtonOutcome {
    /// Global node parameter count of the dependent field.
    pub dimension: usize,
    /// Elements whose derivatives entered the system.
    pub elements: usize,
    /// Descriptions of parameters no element uses, kept fixed by a unit
    /// Hessian diagonal.
    pub unused: Vec<String>,
}

/// Assembles and applies one Newton step. The region's stored parameters
/// are only modified when the whole step succeeds.
pub(crate) fn newton_step(
    region: &mut Region,
    dependent: Field,
    objectives: &[Field],
) -> Result<NewtonOutcome, OptimizationError> {
    if !region.is_finite_element_field(dependent) {
        return Err(OptimizationError::InvalidArgument(
            "the Newton method needs a finite element dependent field",
        ));
    }
    let scalar = scalar_objective_field(region, objectives)?;
    let dimension = highest_mesh_dimension(region)?;
    let parameters = region.field_parameters(dependent)?;
    let count = parameters.count();
    if count == 0 {
        return Err(OptimizationError::InvalidArgument(
            "the dependent field has no node parameters",
        ));
    }

    let mut cache = FieldCache::new();
    let mut gradient = DVector::zeros(count);
    let mut hessian = Matrix::dense(count, count);
    let mut used = vec![false; count];
    let mut assembled = 0usize;
    let mut failures = 0usize;
    let elements: Vec<ElementId> = region.mesh_elements(dimension)?.collect();
    let element_total = elements.len();
    for element in elements {
        let indices = parameters.element_parameter_indices(region, element)?;
        if indices.is_empty() {
            continue;
        }
        match parameters.element_derivatives(region, &mut cache, scalar, element) {
            Ok((first, second)) => {
                for (local_row, &global_row) in indices.iter().enumerate() {
                    // The assembled right-hand side is the negated gradient.
                    gradient[global_row] -= first[local_row];
                    used[global_row] = true;
                    for (local_col, &global_col) in indices.iter().enumerate() {
                        hessian
                            .add(global_row, global_col, second[(local_row, local_col)])
                            .map_err(|error| OptimizationError::SolveFailed(error.to_string()))?;
                    }
                }
                assembled += 1;
            }
            Err(error) => {
                warn!(
                    "objective derivatives failed on element {}: {}",
                    element.identifier(),
                    error
                );
                failures += 1;
            }
        }
    }

    let mut unused = Vec::new();
    for (index, &was_used) in used.iter().enumerate() {
        if was_used {
            continue;
        }
        hessian
            .set(index, index, 1.0)
            .map_err(|error| OptimizationError::SolveFailed(error.to_string()))?;
        let description = match parameters.slot(index) {
            Some(slot) => format!(
                "node {} component {} label {} version {}",
                region.node_identifier(slot.node)?,
                slot.component + 1,
                slot.label.name(),
                slot.version + 1
            ),
            None => format!("parameter {}", index),
        };
        warn!("no element uses parameter {}; keeping it fixed", description);
        unused.push(description);
    }

    if failures > 0 {
        return Err(OptimizationError::SolveFailed(format!(
            "objective derivatives failed on {} of {} element(s)",
            failures, element_total
        )));
    }

    let mut factor = Factor::new();
    factor
        .factorize(&hessian)
        .map_err(|_| OptimizationError::SolveFailed("the assembled Hessian is singular".into()))?;
    let increment = factor
        .solve_vector(&gradient)
        .map_err(|error| OptimizationError::SolveFailed(error.to_string()))?;
    parameters.add_parameters(region, &increment)?;

    Ok(NewtonOutcome {
        dimension: count,
        elements: assembled,
        unused,
    })
}

/// The highest dimension 3, 2 or 1 whose mesh holds at least one element.
fn highest_mesh_dimension(region: &Region) -> Result<usize, OptimizationError> {
    for dimension in (1..=3).rev() {
        if region.mesh_element_count(dimension)? > 0 {
            return Ok(dimension);
        }
    }
    Err(OptimizationError::InvalidArgument(
        "the Newton method needs at least one element",
    ))
}

/// Folds the objective field list into one scalar field, creating helper
/// fields in the region when the list is not already a single scalar.
fn scalar_objective_field(
    region: &mut Region,
    objectives: &[Field],
) -> Result<Field, OptimizationError> {
    match objectives {
        [] => Err(OptimizationError::NoObjectiveFields),
        [objective] => {
            if region.field_component_count(*objective)? == 1 {
                Ok(*objective)
            } else {
                let name = unique_field_name(region, "newton_objective");
                Ok(region.create_sum_components_field(&name, *objective)?)
            }
        }
        [left, right]
            if region.field_component_count(*left)? == 1
                && region.field_component_count(*right)? == 1 =>
        {
            let name = unique_field_name(region, "newton_objective");
            Ok(region.create_add_field(&name, *left, *right)?)
        }
        _ => {
            let terms_name = unique_field_name(region, "newton_objective_terms");
            let terms = region.create_concatenate_field(&terms_name, objectives)?;
            let name = unique_field_name(region, "newton_objective");
            Ok(region.create_sum_components_field(&name, terms)?)
        }
    }
}

fn unique_field_name(region: &Region, base: &str) -> String {
    if region.find_field(base).is_none() {
        return base.to_string();
    }
    let mut suffix = 1usize;
    loop {
        let candidate = format!("{}{}", base, suffix);
        if region.find_field(&candidate).is_none() {
            return candidate;
        }
        suffix += 1;
    }
}
