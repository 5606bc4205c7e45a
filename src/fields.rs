//! A compact node-based field model: regions, nodes, meshes and field
//! expressions, together with the parameter-level access the optimisation
//! engine is built on.

use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Assigning one field's values into another field's storage
pub mod assignment;
/// Evaluation scratch space and memoization
pub mod cache;
/// Field evaluation at nodes, elements and without a location
pub mod evaluate;
/// Field handles, expression kinds and field creation
pub mod field;
/// Meshes, elements, multilinear basis functions and quadrature
pub mod mesh;
/// Nodes, nodesets, value labels and per-node parameter storage
pub mod node;
/// Global and per-element parameter indexing for one field
pub mod parameters;

pub(crate) mod derivative;

pub use assignment::{AssignmentOutcome, FieldAssignment};
pub use cache::FieldCache;
pub use evaluate::{Location, TermLayout};
pub use field::Field;
pub use mesh::ElementId;
pub use node::{NodeFieldLayout, NodeId, NodeValueLabel, Nodeset};
pub use parameters::{FieldParameters, ParameterSlot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    UnknownField,
    UnknownNode,
    UnknownNodeset,
    UnknownElement,
    DuplicateName(String),
    DuplicateIdentifier(u32),
    InvalidArgument(&'static str),
    ComponentMismatch {
        expected: usize,
        found: usize,
    },
    /// The field is not defined, or cannot be evaluated, at the given
    /// location.
    Undefined,
    /// The field has no element-local derivatives with respect to node
    /// parameters.
    NotDifferentiable,
    /// No location of an assignment could be assigned.
    AssignmentFailed,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldError::UnknownField => write!(f, "unknown field handle"),
            FieldError::UnknownNode => write!(f, "unknown node handle"),
            FieldError::UnknownNodeset => write!(f, "unknown nodeset handle"),
            FieldError::UnknownElement => write!(f, "unknown element handle"),
            FieldError::DuplicateName(name) => {
                write!(f, "a field named '{}' already exists", name)
            }
            FieldError::DuplicateIdentifier(id) => {
                write!(f, "identifier {} is already in use", id)
            }
            FieldError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            FieldError::ComponentMismatch { expected, found } => write!(
                f,
                "expected a field with {} component(s), found {}",
                expected, found
            ),
            FieldError::Undefined => write!(f, "field is not defined at this location"),
            FieldError::NotDifferentiable => write!(
                f,
                "field has no element-local derivatives with respect to node parameters"
            ),
            FieldError::AssignmentFailed => write!(f, "no location could be assigned"),
        }
    }
}

impl Error for FieldError {}

/// A batch of coalesced field changes, flushed when the outermost
/// begin/end-change bracket closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChangeEvent {
    /// The changed fields and every field that depends on them, in handle
    /// order.
    pub fields: Vec<Field>,
}

/// Storage address of one optimisable scalar parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DofHandle {
    NodeParameter {
        node: NodeId,
        field: Field,
        component: usize,
        label: NodeValueLabel,
        version: usize,
    },
    ConstantComponent {
        field: Field,
        component: usize,
    },
}

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

/// Owns nodes, meshes and fields, and batches change notification.
///
/// Field, node and element handles are scoped to the region that created
/// them; the region's [`id`](Region::id) lets holders of handles verify they
/// are talking to the right region.
pub struct Region {
    id: u64,
    pub(crate) fields: Vec<field::FieldData>,
    pub(crate) field_names: FxHashMap<String, Field>,
    pub(crate) nodes: Vec<node::NodeData>,
    pub(crate) nodesets: Vec<node::NodesetData>,
    pub(crate) meshes: [mesh::Mesh; 3],
    change_stamp: u64,
    change_depth: u32,
    pending_changes: BTreeSet<Field>,
    change_events: Vec<FieldChangeEvent>,
}

impl Default for Region {
    fn default() -> Self {
        Self::new()
    }
}

impl Region {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed),
            fields: Vec::new(),
            field_names: FxHashMap::default(),
            nodes: Vec::new(),
            nodesets: vec![
                node::NodesetData::new("nodes"),
                node::NodesetData::new("datapoints"),
            ],
            meshes: Default::default(),
            change_stamp: 0,
            change_depth: 0,
            pending_changes: BTreeSet::new(),
            change_events: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The default nodeset over which degrees of freedom are collected.
    pub fn nodes(&self) -> Nodeset {
        Nodeset(0)
    }

    /// A second built-in node domain, conventionally used for data points.
    pub fn datapoints(&self) -> Nodeset {
        Nodeset(1)
    }

    /// Opens a change bracket. Brackets nest; change events are flushed when
    /// the outermost bracket closes.
    pub fn begin_change(&mut self) {
        self.change_depth += 1;
    }

    /// Closes a change bracket, flushing coalesced changes at depth zero.
    pub fn end_change(&mut self) {
        if self.change_depth == 0 {
            log::warn!("end_change called without a matching begin_change");
            return;
        }
        self.change_depth -= 1;
        if self.change_depth == 0 {
            self.flush_changes();
        }
    }

    /// Marks a field and every field depending on it as changed. Outside a
    /// change bracket the event is flushed immediately.
    pub fn mark_field_changed(&mut self, field: Field) {
        self.change_stamp += 1;
        if self.field_data(field).is_err() {
            return;
        }
        self.pending_changes.insert(field);
        for index in 0..self.fields.len() {
            let dependent = Field(index as u32);
            if dependent != field && self.field_depends_on(dependent, field) {
                self.pending_changes.insert(dependent);
            }
        }
        if self.change_depth == 0 {
            self.flush_changes();
        }
    }

    /// Drains the change events flushed so far.
    pub fn take_change_events(&mut self) -> Vec<FieldChangeEvent> {
        std::mem::take(&mut self.change_events)
    }

    pub(crate) fn change_stamp(&self) -> u64 {
        self.change_stamp
    }

    fn flush_changes(&mut self) {
        if self.pending_changes.is_empty() {
            return;
        }
        let fields = std::mem::take(&mut self.pending_changes);
        self.change_events.push(FieldChangeEvent {
            fields: fields.into_iter().collect(),
        });
    }

    /// Reads the scalar a degree-of-freedom handle addresses.
    pub fn dof_value(&self, handle: DofHandle) -> Result<f64, FieldError> {
        match handle {
            DofHandle::NodeParameter {
                node,
                field,
                component,
                label,
                version,
            } => self.node_parameter(node, field, component, label, version),
            DofHandle::ConstantComponent { field, component } => {
                let values = self.constant_field_values(field)?;
                values
                    .get(component)
                    .copied()
                    .ok_or(FieldError::ComponentMismatch {
                        expected: component + 1,
                        found: values.len(),
                    })
            }
        }
    }

    /// Writes through a degree-of-freedom handle without marking the owning
    /// field changed. Callers batching many writes mark fields changed once
    /// afterwards.
    pub fn set_dof_value(&mut self, handle: DofHandle, value: f64) -> Result<(), FieldError> {
        match handle {
            DofHandle::NodeParameter {
                node,
                field,
                component,
                label,
                version,
            } => self.write_node_parameter(node, field, component, label, version, value),
            DofHandle::ConstantComponent { field, component } => {
                self.write_constant_component(field, component, value)
            }
        }
    }
}
