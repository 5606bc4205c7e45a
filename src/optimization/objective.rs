//! Bridging field evaluation to the solver interfaces.
//!
//! A trial point is applied by writing every degree of freedom back to
//! field storage, running the configured field assignments in order and
//! invalidating the evaluation cache. The scalar objective is then the sum
//! over all objective fields of all their component values; the residual
//! form instead concatenates each objective field's sum-of-squares terms,
//! falling back to the field's plain component values when it carries no
//! term structure.

use log::{debug, warn};
use nalgebra::{DVectorView, DVectorViewMut};
use std::error::Error;

use super::dof::DofCollection;
use crate::fields::{
    AssignmentOutcome, Field, FieldAssignment, FieldCache, FieldError, Location, Region, TermLayout,
};
use crate::solvers::{ObjectiveFunction, ResidualFunction};

/// Runs every assignment in order. A partial or fully failed assignment is
/// logged and does not stop the run.
pub(crate) fn run_assignments(region: &mut Region, assignments: &[FieldAssignment]) {
    for (index, assignment) in assignments.iter().enumerate() {
        match assignment.assign(region) {
            Ok(AssignmentOutcome::Complete) => {}
            Ok(AssignmentOutcome::Partial { skipped }) => {
                debug!("field assignment {} skipped {} node(s)", index, skipped);
            }
            Err(error) => {
                warn!("field assignment {} failed: {}", index, error);
            }
        }
    }
}

fn apply_trial(
    region: &mut Region,
    dofs: &DofCollection,
    assignments: &[FieldAssignment],
    x: &DVectorView<f64>,
) -> Result<(), FieldError> {
    dofs.write_values(region, x.as_slice())?;
    run_assignments(region, assignments);
    Ok(())
}

/// The scalar objective seen by the quasi-Newton solver.
pub(crate) struct ScalarObjective<'a> {
    region: &'a mut Region,
    cache: FieldCache,
    dofs: &'a DofCollection,
    assignments: &'a [FieldAssignment],
    objectives: &'a [Field],
}

impl<'a> ScalarObjective<'a> {
    pub(crate) fn new(
        region: &'a mut Region,
        dofs: &'a DofCollection,
        assignments: &'a [FieldAssignment],
        objectives: &'a [Field],
    ) -> Self {
        Self {
            region,
            cache: FieldCache::new(),
            dofs,
            assignments,
            objectives,
        }
    }
}

impl ObjectiveFunction for ScalarObjective<'_> {
    fn dimension(&self) -> usize {
        self.dofs.len()
    }

    fn evaluate(&mut self, x: &DVectorView<f64>) -> Result<f64, Box<dyn Error>> {
        apply_trial(self.region, self.dofs, self.assignments, x)?;
        self.cache.invalidate();
        let mut total = 0.0;
        for &objective in self.objectives {
            let values = self
                .region
                .evaluate(&mut self.cache, objective, Location::None)?;
            total += values.iter().sum::<f64>();
        }
        Ok(total)
    }
}

enum TermKind {
    SumOfSquares,
    Components,
}

/// The residual vector seen by the least-squares solver. Term counts are
/// fixed when the objective is prepared; node and element membership must
/// not change during a solve.
pub(crate) struct TermsObjective<'a> {
    region: &'a mut Region,
    cache: FieldCache,
    dofs: &'a DofCollection,
    assignments: &'a [FieldAssignment],
    terms: Vec<(Field, TermKind)>,
    term_total: usize,
    scratch: Vec<f64>,
}

impl<'a> TermsObjective<'a> {
    pub(crate) fn prepare(
        region: &'a mut Region,
        dofs: &'a DofCollection,
        assignments: &'a [FieldAssignment],
        objectives: &'a [Field],
    ) -> Result<Self, FieldError> {
        let mut cache = FieldCache::new();
        let mut terms = Vec::with_capacity(objectives.len());
        let mut term_total = 0;
        for &objective in objectives {
            match region.sum_square_term_layout(&mut cache, objective)? {
                Some(TermLayout {
                    term_count,
                    term_length,
                }) => {
                    term_total += term_count * term_length;
                    terms.push((objective, TermKind::SumOfSquares));
                }
                None => {
                    term_total += region.field_component_count(objective)?;
                    terms.push((objective, TermKind::Components));
                }
            }
        }
        Ok(Self {
            region,
            cache,
            dofs,
            assignments,
            terms,
            term_total,
            scratch: Vec::new(),
        })
    }
}

impl ResidualFunction for TermsObjective<'_> {
    fn dimension(&self) -> usize {
        self.dofs.len()
    }

    fn residual_count(&self) -> usize {
        self.term_total
    }

    fn evaluate_into(
        &mut self,
        r: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
    ) -> Result<(), Box<dyn Error>> {
        apply_trial(self.region, self.dofs, self.assignments, x)?;
        self.cache.invalidate();
        let Self {
            region,
            cache,
            terms,
            scratch,
            ..
        } = self;
        scratch.clear();
        for (objective, kind) in terms.iter() {
            match kind {
                TermKind::SumOfSquares => {
                    region.evaluate_sum_square_terms(cache, *objective, scratch)?;
                }
                TermKind::Components => {
                    let values = region.evaluate(cache, *objective, Location::None)?;
                    scratch.extend(values);
                }
            }
        }
        if scratch.len() != r.len() {
            return Err(Box::from(format!(
                "expected {} residual terms, evaluated {}",
                r.len(),
                scratch.len()
            )));
        }
        for (slot, &value) in r.iter_mut().zip(scratch.iter()) {
            *slot = value;
        }
        Ok(())
    }
}
