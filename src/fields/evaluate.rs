use super::cache::FieldCache;
use super::field::{Field, FieldDefinition};
use super::mesh::{basis_gradients, basis_values, gauss_rule, ElementId};
use super::node::{NodeId, NodeValueLabel, Nodeset};
use super::{FieldError, Region};

/// Where a field is evaluated. Constant and aggregate fields accept any
/// location, including `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Location {
    None,
    Node(NodeId),
    /// A point inside an element, in local coordinates on [0, 1]^dimension.
    Element {
        element: ElementId,
        xi: [f64; 3],
    },
}

/// Shape of the squared-term list behind a sum-of-squares field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermLayout {
    /// Number of contributing terms (nodes or element Gauss points).
    pub term_count: usize,
    /// Values per term, equal to the integrand component count.
    pub term_length: usize,
}

impl Region {
    /// Evaluates all components of a field at a location.
    pub fn evaluate(
        &self,
        cache: &mut FieldCache,
        field: Field,
        location: Location,
    ) -> Result<Vec<f64>, FieldError> {
        evaluate_field(self, cache, field, location)
    }

    /// Term layout of a sum-of-squares field, or `None` for any other kind.
    pub fn sum_square_term_layout(
        &self,
        cache: &mut FieldCache,
        field: Field,
    ) -> Result<Option<TermLayout>, FieldError> {
        match &self.field_data(field)?.definition {
            FieldDefinition::NodesetSumSquares { integrand, nodeset } => {
                let integrand = *integrand;
                let term_length = self.field_component_count(integrand)?;
                let mut term_count = 0;
                for node in self.nodeset_nodes(*nodeset)? {
                    match evaluate_field(self, cache, integrand, Location::Node(node)) {
                        Ok(_) => term_count += 1,
                        Err(FieldError::Undefined) => {}
                        Err(error) => return Err(error),
                    }
                }
                Ok(Some(TermLayout {
                    term_count,
                    term_length,
                }))
            }
            FieldDefinition::MeshIntegralSquares {
                integrand,
                dimension,
                gauss_points,
                ..
            } => {
                let term_length = self.field_component_count(*integrand)?;
                let points_per_element = gauss_points.pow(*dimension as u32);
                Ok(Some(TermLayout {
                    term_count: self.mesh_element_count(*dimension)? * points_per_element,
                    term_length,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Appends the values of every squared term of a sum-of-squares field,
    /// `term_count * term_length` in total, to `out`. The sum of squares of
    /// the appended values equals the sum over the field's components.
    pub fn evaluate_sum_square_terms(
        &self,
        cache: &mut FieldCache,
        field: Field,
        out: &mut Vec<f64>,
    ) -> Result<(), FieldError> {
        match &self.field_data(field)?.definition {
            FieldDefinition::NodesetSumSquares { integrand, nodeset } => {
                let integrand = *integrand;
                let mut contributed = false;
                for node in self.nodeset_nodes(*nodeset)? {
                    match evaluate_field(self, cache, integrand, Location::Node(node)) {
                        Ok(values) => {
                            out.extend_from_slice(&values);
                            contributed = true;
                        }
                        Err(FieldError::Undefined) => {}
                        Err(error) => return Err(error),
                    }
                }
                if contributed {
                    Ok(())
                } else {
                    Err(FieldError::Undefined)
                }
            }
            FieldDefinition::MeshIntegralSquares {
                integrand,
                coordinates,
                dimension,
                gauss_points,
            } => {
                let integrand = *integrand;
                let coordinates = *coordinates;
                let dimension = *dimension;
                let rule = tensor_gauss(dimension, *gauss_points);
                let elements: Vec<_> = self.mesh_elements(dimension)?.collect();
                for element in elements {
                    let nodal = nodal_coordinates(self, cache, coordinates, element)?;
                    for &(xi, weight) in &rule {
                        let values = evaluate_field(
                            self,
                            cache,
                            integrand,
                            Location::Element { element, xi },
                        )?;
                        let measure = measure_from_nodal(&nodal, dimension, &xi);
                        let scale = (weight * measure).sqrt();
                        out.extend(values.iter().map(|&value| scale * value));
                    }
                }
                Ok(())
            }
            _ => Err(FieldError::InvalidArgument("not a sum-of-squares field")),
        }
    }
}

pub(crate) fn evaluate_field(
    region: &Region,
    cache: &mut FieldCache,
    field: Field,
    location: Location,
) -> Result<Vec<f64>, FieldError> {
    let data = region.field_data(field)?;
    match &data.definition {
        FieldDefinition::FiniteElement => {
            let components = data.component_count;
            match location {
                Location::Node(node) => {
                    let mut values = Vec::with_capacity(components);
                    for component in 0..components {
                        values.push(region.node_parameter(
                            node,
                            field,
                            component,
                            NodeValueLabel::Value,
                            0,
                        )?);
                    }
                    Ok(values)
                }
                Location::Element { element, xi } => {
                    let nodes = region.element_nodes(element)?;
                    let phi = basis_values(element.dimension(), &xi);
                    let mut values = vec![0.0; components];
                    for (local, &node) in nodes.iter().enumerate() {
                        for (component, value) in values.iter_mut().enumerate() {
                            *value += phi[local]
                                * region.node_parameter(
                                    node,
                                    field,
                                    component,
                                    NodeValueLabel::Value,
                                    0,
                                )?;
                        }
                    }
                    Ok(values)
                }
                Location::None => Err(FieldError::Undefined),
            }
        }
        FieldDefinition::Constant { values } => Ok(values.clone()),
        FieldDefinition::Add { left, right } => {
            let (left, right) = (*left, *right);
            let mut values = evaluate_field(region, cache, left, location)?;
            let addend = evaluate_field(region, cache, right, location)?;
            for (value, term) in values.iter_mut().zip(&addend) {
                *value += term;
            }
            Ok(values)
        }
        FieldDefinition::Subtract { left, right } => {
            let (left, right) = (*left, *right);
            let mut values = evaluate_field(region, cache, left, location)?;
            let subtrahend = evaluate_field(region, cache, right, location)?;
            for (value, term) in values.iter_mut().zip(&subtrahend) {
                *value -= term;
            }
            Ok(values)
        }
        FieldDefinition::Multiply { left, right } => {
            let (left, right) = (*left, *right);
            let components = data.component_count;
            let left_values = evaluate_field(region, cache, left, location)?;
            let right_values = evaluate_field(region, cache, right, location)?;
            let mut values = Vec::with_capacity(components);
            for component in 0..components {
                let a = broadcast(&left_values, component);
                let b = broadcast(&right_values, component);
                values.push(a * b);
            }
            Ok(values)
        }
        FieldDefinition::Component { source, index } => {
            let (source, index) = (*source, *index);
            let values = evaluate_field(region, cache, source, location)?;
            Ok(vec![values[index]])
        }
        FieldDefinition::Concatenate { sources } => {
            let sources = sources.clone();
            let mut values = Vec::with_capacity(data.component_count);
            for source in sources {
                values.extend(evaluate_field(region, cache, source, location)?);
            }
            Ok(values)
        }
        FieldDefinition::SumComponents { source } => {
            let source = *source;
            let values = evaluate_field(region, cache, source, location)?;
            Ok(vec![values.iter().sum()])
        }
        FieldDefinition::NodesetSum { integrand, nodeset } => {
            evaluate_nodeset_aggregate(region, cache, field, *integrand, *nodeset, false)
        }
        FieldDefinition::NodesetSumSquares { integrand, nodeset } => {
            evaluate_nodeset_aggregate(region, cache, field, *integrand, *nodeset, true)
        }
        FieldDefinition::MeshIntegral {
            integrand,
            coordinates,
            dimension,
            gauss_points,
        } => evaluate_mesh_integral(
            region,
            cache,
            field,
            *integrand,
            *coordinates,
            *dimension,
            *gauss_points,
            false,
        ),
        FieldDefinition::MeshIntegralSquares {
            integrand,
            coordinates,
            dimension,
            gauss_points,
        } => evaluate_mesh_integral(
            region,
            cache,
            field,
            *integrand,
            *coordinates,
            *dimension,
            *gauss_points,
            true,
        ),
    }
}

fn broadcast(values: &[f64], component: usize) -> f64 {
    if values.len() == 1 {
        values[0]
    } else {
        values[component]
    }
}

/// Sums the integrand (or its squares) over a nodeset. Nodes where the
/// integrand is undefined do not contribute.
fn evaluate_nodeset_aggregate(
    region: &Region,
    cache: &mut FieldCache,
    field: Field,
    integrand: Field,
    nodeset: Nodeset,
    squares: bool,
) -> Result<Vec<f64>, FieldError> {
    let stamp = region.change_stamp();
    if let Some(values) = cache.lookup(field, stamp) {
        return Ok(values.to_vec());
    }
    let components = region.field_component_count(integrand)?;
    let mut sums = vec![0.0; components];
    let mut contributed = false;
    let nodes: Vec<NodeId> = region.nodeset_nodes(nodeset)?.collect();
    for node in nodes {
        match evaluate_field(region, cache, integrand, Location::Node(node)) {
            Ok(values) => {
                for (sum, &value) in sums.iter_mut().zip(&values) {
                    *sum += if squares { value * value } else { value };
                }
                contributed = true;
            }
            Err(FieldError::Undefined) => {}
            Err(error) => return Err(error),
        }
    }
    if !contributed {
        return Err(FieldError::Undefined);
    }
    cache.store(field, stamp, sums.clone());
    Ok(sums)
}

/// Gauss-Legendre integral of the integrand (or its squares) over every
/// element of a mesh. An undefined integrand or coordinate field at any
/// element is an error, unlike the nodeset aggregates.
#[allow(clippy::too_many_arguments)]
fn evaluate_mesh_integral(
    region: &Region,
    cache: &mut FieldCache,
    field: Field,
    integrand: Field,
    coordinates: Field,
    dimension: usize,
    gauss_points: usize,
    squares: bool,
) -> Result<Vec<f64>, FieldError> {
    let stamp = region.change_stamp();
    if let Some(values) = cache.lookup(field, stamp) {
        return Ok(values.to_vec());
    }
    let components = region.field_component_count(integrand)?;
    let rule = tensor_gauss(dimension, gauss_points);
    let mut sums = vec![0.0; components];
    let elements: Vec<ElementId> = region.mesh_elements(dimension)?.collect();
    for element in elements {
        let nodal = nodal_coordinates(region, cache, coordinates, element)?;
        for &(xi, weight) in &rule {
            let values =
                evaluate_field(region, cache, integrand, Location::Element { element, xi })?;
            let measure = measure_from_nodal(&nodal, dimension, &xi);
            for (sum, &value) in sums.iter_mut().zip(&values) {
                *sum += weight * measure * if squares { value * value } else { value };
            }
        }
    }
    cache.store(field, stamp, sums.clone());
    Ok(sums)
}

/// Tensor-product Gauss points and weights for a `dimension`-cube,
/// `points^dimension` in total.
pub(crate) fn tensor_gauss(dimension: usize, points: usize) -> Vec<([f64; 3], f64)> {
    let (xs, ws) = gauss_rule(points);
    let total = points.pow(dimension as u32);
    let mut rule = Vec::with_capacity(total);
    for flat in 0..total {
        let mut xi = [0.0; 3];
        let mut weight = 1.0;
        let mut rest = flat;
        for k in 0..dimension {
            let index = rest % points;
            rest /= points;
            xi[k] = xs[index];
            weight *= ws[index];
        }
        rule.push((xi, weight));
    }
    rule
}

/// Coordinate values at each node of an element, outer index local node.
pub(crate) fn nodal_coordinates(
    region: &Region,
    cache: &mut FieldCache,
    coordinates: Field,
    element: ElementId,
) -> Result<Vec<Vec<f64>>, FieldError> {
    let nodes: Vec<NodeId> = region.element_nodes(element)?.to_vec();
    let mut nodal = Vec::with_capacity(nodes.len());
    for node in nodes {
        nodal.push(evaluate_field(
            region,
            cache,
            coordinates,
            Location::Node(node),
        )?);
    }
    Ok(nodal)
}

/// Differential measure sqrt(det(J^T J)) of the coordinate mapping at `xi`,
/// where J is the jacobian of coordinates with respect to local coordinates.
pub(crate) fn measure_from_nodal(nodal: &[Vec<f64>], dimension: usize, xi: &[f64; 3]) -> f64 {
    let gradients = basis_gradients(dimension, xi);
    let space = nodal.first().map(Vec::len).unwrap_or(0);
    let mut jacobian = vec![[0.0f64; 3]; space];
    for (local, coordinates) in nodal.iter().enumerate() {
        for (i, &x) in coordinates.iter().enumerate() {
            for j in 0..dimension {
                jacobian[i][j] += x * gradients[local][j];
            }
        }
    }
    let mut gram = [[0.0f64; 3]; 3];
    for a in 0..dimension {
        for b in 0..dimension {
            gram[a][b] = jacobian.iter().map(|row| row[a] * row[b]).sum();
        }
    }
    let det = match dimension {
        1 => gram[0][0],
        2 => gram[0][0] * gram[1][1] - gram[0][1] * gram[1][0],
        _ => {
            gram[0][0] * (gram[1][1] * gram[2][2] - gram[1][2] * gram[2][1])
                - gram[0][1] * (gram[1][0] * gram[2][2] - gram[1][2] * gram[2][0])
                + gram[0][2] * (gram[1][0] * gram[2][1] - gram[1][1] * gram[2][0])
        }
    };
    det.max(0.0).sqrt()
}
