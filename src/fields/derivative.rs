use nalgebra::{DMatrix, DVector};

use super::cache::FieldCache;
use super::evaluate::{
    evaluate_field, measure_from_nodal, nodal_coordinates, tensor_gauss, Location,
};
use super::field::{Field, FieldDefinition};
use super::mesh::{basis_values, ElementId};
use super::node::{NodeId, NodeValueLabel};
use super::{FieldError, Region};

/// Value and first and second derivatives of one field component with
/// respect to the element-local parameters of the dependent field.
///
/// Local parameter `local * components + component` is the `Value` parameter
/// (version 0) of the dependent field's `component` at the element's local
/// node `local`.
#[derive(Debug, Clone)]
pub(crate) struct ComponentDerivatives {
    pub(crate) value: f64,
    pub(crate) first: DVector<f64>,
    pub(crate) second: DMatrix<f64>,
}

impl ComponentDerivatives {
    fn constant(value: f64, parameters: usize) -> Self {
        Self {
            value,
            first: DVector::zeros(parameters),
            second: DMatrix::zeros(parameters, parameters),
        }
    }
}

/// The element over which derivatives are taken.
pub(crate) struct ElementContext<'a> {
    pub(crate) region: &'a Region,
    pub(crate) dependent: Field,
    pub(crate) element: ElementId,
    pub(crate) dependent_components: usize,
}

impl ElementContext<'_> {
    fn parameter_count(&self) -> Result<usize, FieldError> {
        Ok(self.region.element_nodes(self.element)?.len() * self.dependent_components)
    }
}

/// Evaluates a field at `xi` on the context element together with its
/// derivatives with respect to the dependent field's element parameters.
///
/// Mesh integral fields contribute their context-element portion only, which
/// is the quantity element assembly accumulates. Their differential measure
/// is treated as independent of the dependent parameters.
pub(crate) fn evaluate_with_derivatives(
    ctx: &ElementContext<'_>,
    cache: &mut FieldCache,
    field: Field,
    xi: &[f64; 3],
    inside_integrand: bool,
) -> Result<Vec<ComponentDerivatives>, FieldError> {
    let region = ctx.region;
    let parameters = ctx.parameter_count()?;
    let data = region.field_data(field)?;
    let components = data.component_count;
    match &data.definition {
        FieldDefinition::FiniteElement => {
            if field != ctx.dependent {
                let values = evaluate_field(
                    region,
                    cache,
                    field,
                    Location::Element {
                        element: ctx.element,
                        xi: *xi,
                    },
                )?;
                return Ok(values
                    .into_iter()
                    .map(|value| ComponentDerivatives::constant(value, parameters))
                    .collect());
            }
            let nodes = region.element_nodes(ctx.element)?;
            let phi = basis_values(ctx.element.dimension(), xi);
            let mut out = Vec::with_capacity(components);
            for component in 0..components {
                let mut value = 0.0;
                let mut first = DVector::zeros(parameters);
                for (local, &node) in nodes.iter().enumerate() {
                    let parameter = region.node_parameter(
                        node,
                        field,
                        component,
                        NodeValueLabel::Value,
                        0,
                    )?;
                    value += phi[local] * parameter;
                    first[local * components + component] = phi[local];
                }
                out.push(ComponentDerivatives {
                    value,
                    first,
                    second: DMatrix::zeros(parameters, parameters),
                });
            }
            Ok(out)
        }
        FieldDefinition::Constant { values } => Ok(values
            .iter()
            .map(|&value| ComponentDerivatives::constant(value, parameters))
            .collect()),
        FieldDefinition::Add { left, right } => {
            let (left, right) = (*left, *right);
            let mut out = evaluate_with_derivatives(ctx, cache, left, xi, inside_integrand)?;
            let addend = evaluate_with_derivatives(ctx, cache, right, xi, inside_integrand)?;
            for (term, other) in out.iter_mut().zip(addend) {
                term.value += other.value;
                term.first += other.first;
                term.second += other.second;
            }
            Ok(out)
        }
        FieldDefinition::Subtract { left, right } => {
            let (left, right) = (*left, *right);
            let mut out = evaluate_with_derivatives(ctx, cache, left, xi, inside_integrand)?;
            let subtrahend = evaluate_with_derivatives(ctx, cache, right, xi, inside_integrand)?;
            for (term, other) in out.iter_mut().zip(subtrahend) {
                term.value -= other.value;
                term.first -= other.first;
                term.second -= other.second;
            }
            Ok(out)
        }
        FieldDefinition::Multiply { left, right } => {
            let (left, right) = (*left, *right);
            let left_terms = evaluate_with_derivatives(ctx, cache, left, xi, inside_integrand)?;
            let right_terms = evaluate_with_derivatives(ctx, cache, right, xi, inside_integrand)?;
            let mut out = Vec::with_capacity(components);
            for component in 0..components {
                let a = broadcast_term(&left_terms, component);
                let b = broadcast_term(&right_terms, component);
                let first = &a.first * b.value + &b.first * a.value;
                let second = &a.second * b.value
                    + &b.second * a.value
                    + &a.first * b.first.transpose()
                    + &b.first * a.first.transpose();
                out.push(ComponentDerivatives {
                    value: a.value * b.value,
                    first,
                    second,
                });
            }
            Ok(out)
        }
        FieldDefinition::Component { source, index } => {
            let (source, index) = (*source, *index);
            let mut terms = evaluate_with_derivatives(ctx, cache, source, xi, inside_integrand)?;
            Ok(vec![terms.swap_remove(index)])
        }
        FieldDefinition::Concatenate { sources } => {
            let sources = sources.clone();
            let mut out = Vec::with_capacity(components);
            for source in sources {
                out.extend(evaluate_with_derivatives(ctx, cache, source, xi, inside_integrand)?);
            }
            Ok(out)
        }
        FieldDefinition::SumComponents { source } => {
            let source = *source;
            let terms = evaluate_with_derivatives(ctx, cache, source, xi, inside_integrand)?;
            let mut sum = ComponentDerivatives::constant(0.0, parameters);
            for term in terms {
                sum.value += term.value;
                sum.first += term.first;
                sum.second += term.second;
            }
            Ok(vec![sum])
        }
        FieldDefinition::NodesetSum { .. } | FieldDefinition::NodesetSumSquares { .. } => {
            Err(FieldError::NotDifferentiable)
        }
        FieldDefinition::MeshIntegral {
            integrand,
            coordinates,
            dimension,
            gauss_points,
        } => element_integral_derivatives(
            ctx,
            cache,
            *integrand,
            *coordinates,
            *dimension,
            *gauss_points,
            false,
            inside_integrand,
        ),
        FieldDefinition::MeshIntegralSquares {
            integrand,
            coordinates,
            dimension,
            gauss_points,
        } => element_integral_derivatives(
            ctx,
            cache,
            *integrand,
            *coordinates,
            *dimension,
            *gauss_points,
            true,
            inside_integrand,
        ),
    }
}

fn broadcast_term<'a>(
    terms: &'a [ComponentDerivatives],
    component: usize,
) -> &'a ComponentDerivatives {
    if terms.len() == 1 {
        &terms[0]
    } else {
        &terms[component]
    }
}

#[allow(clippy::too_many_arguments)]
fn element_integral_derivatives(
    ctx: &ElementContext<'_>,
    cache: &mut FieldCache,
    integrand: Field,
    coordinates: Field,
    dimension: usize,
    gauss_points: usize,
    squares: bool,
    inside_integrand: bool,
) -> Result<Vec<ComponentDerivatives>, FieldError> {
    if inside_integrand || dimension != ctx.element.dimension() {
        return Err(FieldError::NotDifferentiable);
    }
    let region = ctx.region;
    let parameters = ctx.parameter_count()?;
    let components = region.field_component_count(integrand)?;
    let rule = tensor_gauss(dimension, gauss_points);
    let nodal = nodal_coordinates(region, cache, coordinates, ctx.element)?;
    let mut out = vec![ComponentDerivatives::constant(0.0, parameters); components];
    for (xi, weight) in rule {
        let terms = evaluate_with_derivatives(ctx, cache, integrand, &xi, true)?;
        let scale = weight * measure_from_nodal(&nodal, dimension, &xi);
        for (sum, term) in out.iter_mut().zip(&terms) {
            if squares {
                sum.value += scale * term.value * term.value;
                sum.first.axpy(2.0 * scale * term.value, &term.first, 1.0);
                sum.second += 2.0
                    * scale
                    * (&term.first * term.first.transpose() + term.value * &term.second);
            } else {
                sum.value += scale * term.value;
                sum.first.axpy(scale, &term.first, 1.0);
                sum.second += scale * &term.second;
            }
        }
    }
    Ok(out)
}

/// Value of one field component at a node together with its gradient with
/// respect to the components of a target field at the same node.
#[derive(Debug, Clone)]
pub(crate) struct ComponentGradient {
    pub(crate) value: f64,
    pub(crate) gradient: Vec<f64>,
}

/// Evaluates a field at a node with first derivatives with respect to the
/// target field's component values there. Aggregate fields that evaluate the
/// target over other locations cannot be differentiated this way.
pub(crate) fn node_gradient_wrt_field(
    region: &Region,
    cache: &mut FieldCache,
    field: Field,
    target: Field,
    node: NodeId,
) -> Result<Vec<ComponentGradient>, FieldError> {
    let target_components = region.field_component_count(target)?;
    if !region.field_depends_on(field, target) {
        let values = evaluate_field(region, cache, field, Location::Node(node))?;
        return Ok(values
            .into_iter()
            .map(|value| ComponentGradient {
                value,
                gradient: vec![0.0; target_components],
            })
            .collect());
    }
    if field == target {
        let values = evaluate_field(region, cache, field, Location::Node(node))?;
        return Ok(values
            .into_iter()
            .enumerate()
            .map(|(component, value)| {
                let mut gradient = vec![0.0; target_components];
                gradient[component] = 1.0;
                ComponentGradient { value, gradient }
            })
            .collect());
    }
    let data = region.field_data(field)?;
    let components = data.component_count;
    match &data.definition {
        FieldDefinition::Add { left, right } => {
            let (left, right) = (*left, *right);
            let mut out = node_gradient_wrt_field(region, cache, left, target, node)?;
            let addend = node_gradient_wrt_field(region, cache, right, target, node)?;
            for (term, other) in out.iter_mut().zip(addend) {
                term.value += other.value;
                for (g, h) in term.gradient.iter_mut().zip(other.gradient) {
                    *g += h;
                }
            }
            Ok(out)
        }
        FieldDefinition::Subtract { left, right } => {
            let (left, right) = (*left, *right);
            let mut out = node_gradient_wrt_field(region, cache, left, target, node)?;
            let subtrahend = node_gradient_wrt_field(region, cache, right, target, node)?;
            for (term, other) in out.iter_mut().zip(subtrahend) {
                term.value -= other.value;
                for (g, h) in term.gradient.iter_mut().zip(other.gradient) {
                    *g -= h;
                }
            }
            Ok(out)
        }
        FieldDefinition::Multiply { left, right } => {
            let (left, right) = (*left, *right);
            let left_terms = node_gradient_wrt_field(region, cache, left, target, node)?;
            let right_terms = node_gradient_wrt_field(region, cache, right, target, node)?;
            let mut out = Vec::with_capacity(components);
            for component in 0..components {
                let a = broadcast_gradient(&left_terms, component);
                let b = broadcast_gradient(&right_terms, component);
                let gradient = a
                    .gradient
                    .iter()
                    .zip(&b.gradient)
                    .map(|(&da, &db)| da * b.value + db * a.value)
                    .collect();
                out.push(ComponentGradient {
                    value: a.value * b.value,
                    gradient,
                });
            }
            Ok(out)
        }
        FieldDefinition::Component { source, index } => {
            let (source, index) = (*source, *index);
            let mut terms = node_gradient_wrt_field(region, cache, source, target, node)?;
            Ok(vec![terms.swap_remove(index)])
        }
        FieldDefinition::Concatenate { sources } => {
            let sources = sources.clone();
            let mut out = Vec::with_capacity(components);
            for source in sources {
                out.extend(node_gradient_wrt_field(region, cache, source, target, node)?);
            }
            Ok(out)
        }
        FieldDefinition::SumComponents { source } => {
            let source = *source;
            let terms = node_gradient_wrt_field(region, cache, source, target, node)?;
            let mut value = 0.0;
            let mut gradient = vec![0.0; target_components];
            for term in terms {
                value += term.value;
                for (g, h) in gradient.iter_mut().zip(term.gradient) {
                    *g += h;
                }
            }
            Ok(vec![ComponentGradient { value, gradient }])
        }
        _ => Err(FieldError::NotDifferentiable),
    }
}

fn broadcast_gradient<'a>(terms: &'a [ComponentGradient], component: usize) -> &'a ComponentGradient {
    if terms.len() == 1 {
        &terms[0]
    } else {
        &terms[component]
    }
}
