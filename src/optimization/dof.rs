//! Collecting the degrees of freedom exposed by dependent fields.
//!
//! Finite element dependent fields contribute every stored node parameter
//! of every node in the region's default nodeset; constant dependent
//! fields contribute one degree of freedom per component. A conditional
//! field masks entries: evaluated per node for node parameters and once,
//! without a location, for constants. A scalar conditional keeps or drops
//! all components together, a conditional with matching component count
//! keeps or drops them individually, and an undefined conditional drops
//! the node or field outright.

use nalgebra::DVector;

use crate::fields::{DofHandle, Field, FieldCache, FieldError, Location, NodeId, Region};

/// One solver unknown and the storage address it came from.
#[derive(Debug, Clone, Copy)]
pub struct Dof {
    pub handle: DofHandle,
    pub initial_value: f64,
}

/// An ordered set of degrees of freedom. The order is the iteration order
/// of [`collect`]: dependent fields as listed, nodes by ascending
/// identifier, then components, value labels and versions in storage
/// order.
#[derive(Debug, Default)]
pub struct DofCollection {
    dofs: Vec<Dof>,
}

impl DofCollection {
    pub fn len(&self) -> usize {
        self.dofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dofs.is_empty()
    }

    pub fn dofs(&self) -> &[Dof] {
        &self.dofs
    }

    /// The stored values at collection time, as a solver starting point.
    pub fn initial_values(&self) -> DVector<f64> {
        DVector::from_iterator(self.dofs.len(), self.dofs.iter().map(|dof| dof.initial_value))
    }

    /// Writes one value per degree of freedom back to field storage.
    /// Callers mark the affected fields changed once the batch is done.
    pub fn write_values(&self, region: &mut Region, values: &[f64]) -> Result<(), FieldError> {
        if values.len() != self.dofs.len() {
            return Err(FieldError::InvalidArgument(
                "value count does not match the degree of freedom count",
            ));
        }
        for (dof, &value) in self.dofs.iter().zip(values) {
            region.set_dof_value(dof.handle, value)?;
        }
        Ok(())
    }
}

/// Walks the dependent field list and gathers every unmasked degree of
/// freedom with its current value.
pub fn collect(
    region: &Region,
    fields: &[(Field, Option<Field>)],
) -> Result<DofCollection, FieldError> {
    let mut cache = FieldCache::new();
    let mut dofs = Vec::new();
    for &(field, conditional) in fields {
        if region.is_finite_element_field(field) {
            collect_node_parameters(region, &mut cache, field, conditional, &mut dofs)?;
        } else if region.is_constant_field(field) {
            collect_constant_components(region, &mut cache, field, conditional, &mut dofs)?;
        } else {
            return Err(FieldError::InvalidArgument(
                "dependent fields must be finite element or constant fields",
            ));
        }
    }
    Ok(DofCollection { dofs })
}

fn collect_node_parameters(
    region: &Region,
    cache: &mut FieldCache,
    field: Field,
    conditional: Option<Field>,
    dofs: &mut Vec<Dof>,
) -> Result<(), FieldError> {
    let components = region.field_component_count(field)?;
    let nodes: Vec<NodeId> = region.nodeset_nodes(region.nodes())?.collect();
    for node in nodes {
        let mask = match conditional {
            Some(conditional) => {
                match component_mask(region, cache, conditional, components, Location::Node(node))?
                {
                    Some(mask) => mask,
                    None => continue,
                }
            }
            None => vec![true; components],
        };
        if !region.node_field_defined(node, field) {
            continue;
        }
        for component in 0..components {
            if !mask[component] {
                continue;
            }
            let labels = region.node_component_labels(node, field, component)?;
            for (label, versions) in labels {
                for version in 0..versions {
                    let handle = DofHandle::NodeParameter {
                        node,
                        field,
                        component,
                        label,
                        version,
                    };
                    let initial_value = region.node_parameter(node, field, component, label, version)?;
                    dofs.push(Dof {
                        handle,
                        initial_value,
                    });
                }
            }
        }
    }
    Ok(())
}

fn collect_constant_components(
    region: &Region,
    cache: &mut FieldCache,
    field: Field,
    conditional: Option<Field>,
    dofs: &mut Vec<Dof>,
) -> Result<(), FieldError> {
    let values = region.constant_field_values(field)?.to_vec();
    let mask = match conditional {
        Some(conditional) => {
            match component_mask(region, cache, conditional, values.len(), Location::None)? {
                Some(mask) => mask,
                None => return Ok(()),
            }
        }
        None => vec![true; values.len()],
    };
    for (component, &initial_value) in values.iter().enumerate() {
        if !mask[component] {
            continue;
        }
        dofs.push(Dof {
            handle: DofHandle::ConstantComponent { field, component },
            initial_value,
        });
    }
    Ok(())
}

/// Evaluates a conditional field into a per-component keep mask.
/// `Ok(None)` means the conditional is undefined at the location and the
/// whole node or field is dropped.
fn component_mask(
    region: &Region,
    cache: &mut FieldCache,
    conditional: Field,
    components: usize,
    location: Location,
) -> Result<Option<Vec<bool>>, FieldError> {
    match region.evaluate(cache, conditional, location) {
        Ok(values) if values.len() == 1 => {
            let keep = values[0] != 0.0;
            Ok(Some(vec![keep; components]))
        }
        Ok(values) => Ok(Some(values.iter().map(|&value| value != 0.0).collect())),
        Err(FieldError::Undefined) => Ok(None),
        Err(error) => Err(error),
    }
}
