use nalgebra::{DMatrix, DVector};
use rustc_hash::FxHashMap;

use super::cache::FieldCache;
use super::derivative::{evaluate_with_derivatives, ElementContext};
use super::field::Field;
use super::mesh::ElementId;
use super::node::{NodeId, NodeValueLabel};
use super::{FieldError, Region};

/// Addresses one scalar node parameter of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterSlot {
    pub node: NodeId,
    pub component: usize,
    pub label: NodeValueLabel,
    pub version: usize,
}

/// A frozen global numbering of every node parameter of one finite element
/// field: nodes in increasing identifier order, components in order within a
/// node, labels in label order within a component, versions in order.
///
/// The numbering is a snapshot. Defining the field at further nodes after
/// construction leaves the numbering stale, so build it fresh per solve.
#[derive(Debug)]
pub struct FieldParameters {
    field: Field,
    slots: Vec<ParameterSlot>,
    index: FxHashMap<ParameterSlot, usize>,
}

impl Region {
    /// Builds the global parameter numbering of a finite element field over
    /// the default node domain.
    pub fn field_parameters(&self, field: Field) -> Result<FieldParameters, FieldError> {
        if !self.is_finite_element_field(field) {
            return Err(FieldError::InvalidArgument(
                "only finite element fields carry node parameters",
            ));
        }
        let components = self.field_component_count(field)?;
        let mut slots = Vec::new();
        for node in self.nodeset_nodes(self.nodes())? {
            if !self.node_field_defined(node, field) {
                continue;
            }
            for component in 0..components {
                for (label, versions) in self.node_component_labels(node, field, component)? {
                    for version in 0..versions {
                        slots.push(ParameterSlot {
                            node,
                            component,
                            label,
                            version,
                        });
                    }
                }
            }
        }
        let index = slots
            .iter()
            .enumerate()
            .map(|(position, &slot)| (slot, position))
            .collect();
        Ok(FieldParameters {
            field,
            slots,
            index,
        })
    }
}

impl FieldParameters {
    pub fn field(&self) -> Field {
        self.field
    }

    /// Total number of global parameters.
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, global_index: usize) -> Option<ParameterSlot> {
        self.slots.get(global_index).copied()
    }

    pub fn global_index(&self, slot: ParameterSlot) -> Option<usize> {
        self.index.get(&slot).copied()
    }

    /// Global indices of the parameters interpolated by an element, ordered
    /// node-major then component. Local index `local * components +
    /// component` maps to the `Value` parameter of that node and component.
    ///
    /// Returns an empty list when the field is not fully defined over the
    /// element's nodes, in which case the element holds no parameters.
    pub fn element_parameter_indices(
        &self,
        region: &Region,
        element: ElementId,
    ) -> Result<Vec<usize>, FieldError> {
        let components = region.field_component_count(self.field)?;
        let nodes: Vec<NodeId> = region.element_nodes(element)?.to_vec();
        let mut indices = Vec::with_capacity(nodes.len() * components);
        for node in nodes {
            for component in 0..components {
                let slot = ParameterSlot {
                    node,
                    component,
                    label: NodeValueLabel::Value,
                    version: 0,
                };
                match self.global_index(slot) {
                    Some(global) => indices.push(global),
                    None => return Ok(Vec::new()),
                }
            }
        }
        Ok(indices)
    }

    /// First and second derivatives of a scalar field with respect to this
    /// field's element parameters, both sized to the element parameter count.
    pub fn element_derivatives(
        &self,
        region: &Region,
        cache: &mut FieldCache,
        scalar: Field,
        element: ElementId,
    ) -> Result<(DVector<f64>, DMatrix<f64>), FieldError> {
        let found = region.field_component_count(scalar)?;
        if found != 1 {
            return Err(FieldError::ComponentMismatch { expected: 1, found });
        }
        let ctx = ElementContext {
            region,
            dependent: self.field,
            element,
            dependent_components: region.field_component_count(self.field)?,
        };
        let xi = [0.5; 3];
        let mut terms = evaluate_with_derivatives(&ctx, cache, scalar, &xi, false)?;
        let term = terms.pop().ok_or(FieldError::Undefined)?;
        Ok((term.first, term.second))
    }

    /// Adds an increment to every global parameter in one pass and marks the
    /// field changed. Slots are written in numbering order; a write failure
    /// aborts mid-way and the earlier writes stay applied.
    pub fn add_parameters(
        &self,
        region: &mut Region,
        increment: &DVector<f64>,
    ) -> Result<(), FieldError> {
        if increment.len() != self.slots.len() {
            return Err(FieldError::InvalidArgument(
                "increment length must match the global parameter count",
            ));
        }
        for (slot, delta) in self.slots.iter().zip(increment.iter()) {
            let current = region.node_parameter(
                slot.node,
                self.field,
                slot.component,
                slot.label,
                slot.version,
            )?;
            region.write_node_parameter(
                slot.node,
                self.field,
                slot.component,
                slot.label,
                slot.version,
                current + delta,
            )?;
        }
        region.mark_field_changed(self.field);
        Ok(())
    }
}
