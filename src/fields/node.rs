use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::field::Field;
use super::{FieldError, Region};

/// Opaque handle to a node. Nodes are iterated through their nodeset in
/// increasing user-identifier order, not handle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

/// Handle to a built-in node domain or a named node group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nodeset(pub(crate) u32);

/// The value and derivative parameters a field component can store at a node.
///
/// Declaration order matches the conventional label numbering, which is also
/// the order parameters are walked when degrees of freedom are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeValueLabel {
    Value,
    Ds1,
    Ds2,
    Ds12,
    Ds3,
    Ds13,
    Ds23,
    Ds123,
}

impl NodeValueLabel {
    pub const ALL: [NodeValueLabel; 8] = [
        NodeValueLabel::Value,
        NodeValueLabel::Ds1,
        NodeValueLabel::Ds2,
        NodeValueLabel::Ds12,
        NodeValueLabel::Ds3,
        NodeValueLabel::Ds13,
        NodeValueLabel::Ds23,
        NodeValueLabel::Ds123,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NodeValueLabel::Value => "value",
            NodeValueLabel::Ds1 => "d/ds1",
            NodeValueLabel::Ds2 => "d/ds2",
            NodeValueLabel::Ds12 => "d2/ds1ds2",
            NodeValueLabel::Ds3 => "d/ds3",
            NodeValueLabel::Ds13 => "d2/ds1ds3",
            NodeValueLabel::Ds23 => "d2/ds2ds3",
            NodeValueLabel::Ds123 => "d3/ds1ds2ds3",
        }
    }
}

/// Declares, per component, which labels a field stores at a node and how
/// many versions of each.
#[derive(Debug, Clone)]
pub struct NodeFieldLayout {
    pub(crate) components: Vec<Vec<(NodeValueLabel, usize)>>,
}

impl NodeFieldLayout {
    /// One `Value` parameter with a single version for every component.
    pub fn value_only(component_count: usize) -> Self {
        Self::uniform(component_count, &[(NodeValueLabel::Value, 1)])
    }

    /// The same labels and version counts for every component.
    pub fn uniform(component_count: usize, labels: &[(NodeValueLabel, usize)]) -> Self {
        Self {
            components: vec![labels.to_vec(); component_count],
        }
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Replaces the labels of one component.
    pub fn set_component_labels(
        &mut self,
        component: usize,
        labels: &[(NodeValueLabel, usize)],
    ) -> Result<(), FieldError> {
        let slot = self
            .components
            .get_mut(component)
            .ok_or(FieldError::InvalidArgument("component index out of range"))?;
        *slot = labels.to_vec();
        Ok(())
    }
}

/// Storage of one field component at one node: for each declared label, one
/// value per version. Labels are kept sorted.
#[derive(Debug, Clone, Default)]
pub(crate) struct ComponentParameters {
    pub(crate) labels: Vec<(NodeValueLabel, Vec<f64>)>,
}

impl ComponentParameters {
    fn from_layout(labels: &[(NodeValueLabel, usize)]) -> Result<Self, FieldError> {
        let mut storage: Vec<(NodeValueLabel, Vec<f64>)> = Vec::with_capacity(labels.len());
        for &(label, versions) in labels {
            if versions == 0 {
                return Err(FieldError::InvalidArgument(
                    "a label must store at least one version",
                ));
            }
            if storage.iter().any(|(existing, _)| *existing == label) {
                return Err(FieldError::InvalidArgument(
                    "a label may only be declared once per component",
                ));
            }
            storage.push((label, vec![0.0; versions]));
        }
        storage.sort_by_key(|(label, _)| *label);
        Ok(Self { labels: storage })
    }

    pub(crate) fn get(&self, label: NodeValueLabel, version: usize) -> Option<f64> {
        self.labels
            .iter()
            .find(|(stored, _)| *stored == label)
            .and_then(|(_, versions)| versions.get(version))
            .copied()
    }

    pub(crate) fn set(&mut self, label: NodeValueLabel, version: usize, value: f64) -> bool {
        if let Some((_, versions)) = self.labels.iter_mut().find(|(stored, _)| *stored == label) {
            if let Some(slot) = versions.get_mut(version) {
                *slot = value;
                return true;
            }
        }
        false
    }

    pub(crate) fn version_count(&self, label: NodeValueLabel) -> usize {
        self.labels
            .iter()
            .find(|(stored, _)| *stored == label)
            .map(|(_, versions)| versions.len())
            .unwrap_or(0)
    }
}

#[derive(Debug)]
pub(crate) struct NodeData {
    pub(crate) identifier: u32,
    pub(crate) fields: FxHashMap<Field, Vec<ComponentParameters>>,
}

#[derive(Debug)]
pub(crate) struct NodesetData {
    pub(crate) name: String,
    pub(crate) is_group: bool,
    pub(crate) members: BTreeMap<u32, NodeId>,
}

impl NodesetData {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_group: false,
            members: BTreeMap::new(),
        }
    }

    fn group(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_group: true,
            members: BTreeMap::new(),
        }
    }
}

impl Region {
    /// Creates a node with the given identifier in a built-in node domain.
    pub fn create_node(&mut self, nodeset: Nodeset, identifier: u32) -> Result<NodeId, FieldError> {
        if identifier == 0 {
            return Err(FieldError::InvalidArgument("node identifiers start at 1"));
        }
        let set = self.nodeset_data(nodeset)?;
        if set.is_group {
            return Err(FieldError::InvalidArgument(
                "nodes are created in a node domain, not a group",
            ));
        }
        if set.members.contains_key(&identifier) {
            return Err(FieldError::DuplicateIdentifier(identifier));
        }
        let node = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData {
            identifier,
            fields: FxHashMap::default(),
        });
        self.nodesets[nodeset.0 as usize]
            .members
            .insert(identifier, node);
        Ok(node)
    }

    /// Creates an initially empty node group.
    pub fn create_nodeset_group(&mut self, name: &str) -> Result<Nodeset, FieldError> {
        if self.nodesets.iter().any(|set| set.name == name) {
            return Err(FieldError::DuplicateName(name.to_string()));
        }
        let handle = Nodeset(self.nodesets.len() as u32);
        self.nodesets.push(NodesetData::group(name));
        Ok(handle)
    }

    /// Adds an existing node to a group. Adding a node twice is a no-op.
    pub fn add_node_to_group(&mut self, group: Nodeset, node: NodeId) -> Result<(), FieldError> {
        let identifier = self.node_identifier(node)?;
        let set = self.nodeset_data(group)?;
        if !set.is_group {
            return Err(FieldError::InvalidArgument(
                "nodes can only be added to a group",
            ));
        }
        match set.members.get(&identifier) {
            Some(existing) if *existing == node => Ok(()),
            Some(_) => Err(FieldError::DuplicateIdentifier(identifier)),
            None => {
                self.nodesets[group.0 as usize].members.insert(identifier, node);
                Ok(())
            }
        }
    }

    pub fn nodeset_size(&self, nodeset: Nodeset) -> Result<usize, FieldError> {
        Ok(self.nodeset_data(nodeset)?.members.len())
    }

    pub fn nodeset_contains(&self, nodeset: Nodeset, node: NodeId) -> bool {
        match self.node_data(node) {
            Ok(data) => self
                .nodeset_data(nodeset)
                .map(|set| set.members.get(&data.identifier) == Some(&node))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Nodes of a nodeset in increasing identifier order.
    pub fn nodeset_nodes(
        &self,
        nodeset: Nodeset,
    ) -> Result<impl Iterator<Item = NodeId> + '_, FieldError> {
        Ok(self.nodeset_data(nodeset)?.members.values().copied())
    }

    pub fn find_node(&self, nodeset: Nodeset, identifier: u32) -> Option<NodeId> {
        self.nodeset_data(nodeset)
            .ok()
            .and_then(|set| set.members.get(&identifier))
            .copied()
    }

    pub fn node_identifier(&self, node: NodeId) -> Result<u32, FieldError> {
        Ok(self.node_data(node)?.identifier)
    }

    /// Declares storage for a finite element field at a node. All parameters
    /// start at zero.
    pub fn define_node_field(
        &mut self,
        node: NodeId,
        field: Field,
        layout: &NodeFieldLayout,
    ) -> Result<(), FieldError> {
        let component_count = self.field_component_count(field)?;
        if !self.is_finite_element_field(field) {
            return Err(FieldError::InvalidArgument(
                "only finite element fields store node parameters",
            ));
        }
        if layout.component_count() != component_count {
            return Err(FieldError::ComponentMismatch {
                expected: component_count,
                found: layout.component_count(),
            });
        }
        let mut components = Vec::with_capacity(component_count);
        for labels in &layout.components {
            components.push(ComponentParameters::from_layout(labels)?);
        }
        let data = self.node_data_mut(node)?;
        if data.fields.contains_key(&field) {
            return Err(FieldError::InvalidArgument(
                "field is already defined at this node",
            ));
        }
        data.fields.insert(field, components);
        self.mark_field_changed(field);
        Ok(())
    }

    pub fn node_field_defined(&self, node: NodeId, field: Field) -> bool {
        self.node_data(node)
            .map(|data| data.fields.contains_key(&field))
            .unwrap_or(false)
    }

    /// The labels stored for one component at a node, with their version
    /// counts, in label order.
    pub fn node_component_labels(
        &self,
        node: NodeId,
        field: Field,
        component: usize,
    ) -> Result<Vec<(NodeValueLabel, usize)>, FieldError> {
        let components = self.node_field_components(node, field)?;
        let parameters = components.get(component).ok_or(FieldError::Undefined)?;
        Ok(parameters
            .labels
            .iter()
            .map(|(label, versions)| (*label, versions.len()))
            .collect())
    }

    pub fn node_parameter(
        &self,
        node: NodeId,
        field: Field,
        component: usize,
        label: NodeValueLabel,
        version: usize,
    ) -> Result<f64, FieldError> {
        let components = self.node_field_components(node, field)?;
        components
            .get(component)
            .and_then(|parameters| parameters.get(label, version))
            .ok_or(FieldError::Undefined)
    }

    /// Writes one node parameter and marks the field changed.
    pub fn set_node_parameter(
        &mut self,
        node: NodeId,
        field: Field,
        component: usize,
        label: NodeValueLabel,
        version: usize,
        value: f64,
    ) -> Result<(), FieldError> {
        self.write_node_parameter(node, field, component, label, version, value)?;
        self.mark_field_changed(field);
        Ok(())
    }

    /// Writes one node parameter without change notification.
    pub(crate) fn write_node_parameter(
        &mut self,
        node: NodeId,
        field: Field,
        component: usize,
        label: NodeValueLabel,
        version: usize,
        value: f64,
    ) -> Result<(), FieldError> {
        let data = self.node_data_mut(node)?;
        let components = data.fields.get_mut(&field).ok_or(FieldError::Undefined)?;
        let parameters = components.get_mut(component).ok_or(FieldError::Undefined)?;
        if parameters.set(label, version, value) {
            Ok(())
        } else {
            Err(FieldError::Undefined)
        }
    }

    pub(crate) fn node_field_components(
        &self,
        node: NodeId,
        field: Field,
    ) -> Result<&Vec<ComponentParameters>, FieldError> {
        self.node_data(node)?
            .fields
            .get(&field)
            .ok_or(FieldError::Undefined)
    }

    pub(crate) fn node_data(&self, node: NodeId) -> Result<&NodeData, FieldError> {
        self.nodes
            .get(node.0 as usize)
            .ok_or(FieldError::UnknownNode)
    }

    fn node_data_mut(&mut self, node: NodeId) -> Result<&mut NodeData, FieldError> {
        self.nodes
            .get_mut(node.0 as usize)
            .ok_or(FieldError::UnknownNode)
    }

    pub(crate) fn nodeset_data(&self, nodeset: Nodeset) -> Result<&NodesetData, FieldError> {
        self.nodesets
            .get(nodeset.0 as usize)
            .ok_or(FieldError::UnknownNodeset)
    }
}
