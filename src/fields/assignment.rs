use super::cache::FieldCache;
use super::derivative::node_gradient_wrt_field;
use super::evaluate::{evaluate_field, Location};
use super::field::Field;
use super::node::{NodeId, NodeValueLabel, Nodeset};
use super::{FieldError, Region};

/// Result of applying a field assignment over its nodeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentOutcome {
    /// Every visited node was assigned.
    Complete,
    /// Some nodes could not be assigned and were left untouched.
    Partial { skipped: usize },
}

/// Copies a source field into a finite element target field's node
/// parameters, optionally restricted by a conditional field and a nodeset.
///
/// Three strategies apply per node, chosen by the source field's kind:
/// parameters of a finite element source are copied label by label; a source
/// that is a function of the target updates the target's derivative
/// parameters through the chain rule; any other source has its value
/// broadcast into every version of the target's value parameters.
#[derive(Debug, Clone)]
pub struct FieldAssignment {
    target: Field,
    source: Field,
    conditional: Option<Field>,
    nodeset: Option<Nodeset>,
}

impl FieldAssignment {
    pub fn new(region: &Region, target: Field, source: Field) -> Result<Self, FieldError> {
        if !region.is_finite_element_field(target) {
            return Err(FieldError::InvalidArgument(
                "assignment targets must be finite element fields",
            ));
        }
        let expected = region.field_component_count(target)?;
        let found = region.field_component_count(source)?;
        if expected != found {
            return Err(FieldError::ComponentMismatch { expected, found });
        }
        Ok(Self {
            target,
            source,
            conditional: None,
            nodeset: None,
        })
    }

    pub fn target(&self) -> Field {
        self.target
    }

    pub fn source(&self) -> Field {
        self.source
    }

    pub fn conditional_field(&self) -> Option<Field> {
        self.conditional
    }

    /// Restricts assignment to nodes where the conditional field is defined
    /// and nonzero. The conditional must be scalar or match the target's
    /// component count.
    pub fn set_conditional_field(
        &mut self,
        region: &Region,
        conditional: Option<Field>,
    ) -> Result<(), FieldError> {
        if let Some(field) = conditional {
            let components = region.field_component_count(field)?;
            let target_components = region.field_component_count(self.target)?;
            if components != 1 && components != target_components {
                return Err(FieldError::ComponentMismatch {
                    expected: target_components,
                    found: components,
                });
            }
        }
        self.conditional = conditional;
        Ok(())
    }

    pub fn nodeset(&self) -> Option<Nodeset> {
        self.nodeset
    }

    /// Restricts assignment to one nodeset instead of the default node
    /// domain.
    pub fn set_nodeset(
        &mut self,
        region: &Region,
        nodeset: Option<Nodeset>,
    ) -> Result<(), FieldError> {
        if let Some(set) = nodeset {
            region.nodeset_data(set)?;
        }
        self.nodeset = nodeset;
        Ok(())
    }

    /// Applies the assignment to every node of the nodeset that passes the
    /// conditional. Nodes that cannot be assigned are skipped and counted;
    /// the assignment fails only if no visited node could be assigned.
    pub fn assign(&self, region: &mut Region) -> Result<AssignmentOutcome, FieldError> {
        region.begin_change();
        let result = self.assign_nodes(region);
        region.end_change();
        result
    }

    fn assign_nodes(&self, region: &mut Region) -> Result<AssignmentOutcome, FieldError> {
        let mut cache = FieldCache::new();
        let nodeset = self.nodeset.unwrap_or_else(|| region.nodes());
        let nodes: Vec<NodeId> = region.nodeset_nodes(nodeset)?.collect();
        let components = region.field_component_count(self.target)?;
        let source_is_finite_element = region.is_finite_element_field(self.source);
        let source_uses_target =
            self.source != self.target && region.field_depends_on(self.source, self.target);

        let mut visited = 0usize;
        let mut assigned = 0usize;
        let mut skipped = 0usize;
        for node in nodes {
            if let Some(conditional) = self.conditional {
                match evaluate_field(region, &mut cache, conditional, Location::Node(node)) {
                    Ok(values) if values.iter().any(|&value| value != 0.0) => {}
                    Ok(_) | Err(FieldError::Undefined) => continue,
                    Err(error) => return Err(error),
                }
            }
            visited += 1;
            if !region.node_field_defined(node, self.target) {
                skipped += 1;
                continue;
            }
            let outcome = if source_is_finite_element {
                self.copy_node_parameters(region, node, components)
            } else if source_uses_target {
                self.chain_rule_node(region, &mut cache, node, components)
            } else {
                self.broadcast_node(region, &mut cache, node, components)
            };
            match outcome {
                Ok(()) => assigned += 1,
                Err(FieldError::Undefined) | Err(FieldError::NotDifferentiable) => skipped += 1,
                Err(error) => return Err(error),
            }
        }
        if assigned > 0 {
            region.mark_field_changed(self.target);
        }
        if assigned == 0 && visited > 0 {
            return Err(FieldError::AssignmentFailed);
        }
        if skipped > 0 {
            Ok(AssignmentOutcome::Partial { skipped })
        } else {
            Ok(AssignmentOutcome::Complete)
        }
    }

    /// Copies every (component, label, version) stored by both fields.
    fn copy_node_parameters(
        &self,
        region: &mut Region,
        node: NodeId,
        components: usize,
    ) -> Result<(), FieldError> {
        if !region.node_field_defined(node, self.source) {
            return Err(FieldError::Undefined);
        }
        for component in 0..components {
            for (label, versions) in region.node_component_labels(node, self.target, component)? {
                for version in 0..versions {
                    match region.node_parameter(node, self.source, component, label, version) {
                        Ok(value) => {
                            region.write_node_parameter(
                                node,
                                self.target,
                                component,
                                label,
                                version,
                                value,
                            )?;
                        }
                        Err(FieldError::Undefined) => {}
                        Err(error) => return Err(error),
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes source values into the target's value parameters and updates
    /// its derivative parameters with the chain rule, using the source's
    /// gradient with respect to the target's components at this node.
    fn chain_rule_node(
        &self,
        region: &mut Region,
        cache: &mut FieldCache,
        node: NodeId,
        components: usize,
    ) -> Result<(), FieldError> {
        let gradients = node_gradient_wrt_field(region, cache, self.source, self.target, node)?;

        // The chain rule reads the pre-assignment parameters of every
        // component, so snapshot them before the first write.
        let mut old: Vec<Vec<(NodeValueLabel, Vec<f64>)>> = Vec::with_capacity(components);
        for component in 0..components {
            let mut stored = Vec::new();
            for (label, versions) in region.node_component_labels(node, self.target, component)? {
                let mut values = Vec::with_capacity(versions);
                for version in 0..versions {
                    values.push(region.node_parameter(
                        node,
                        self.target,
                        component,
                        label,
                        version,
                    )?);
                }
                stored.push((label, values));
            }
            old.push(stored);
        }

        for component in 0..components {
            let labels: Vec<(NodeValueLabel, usize)> = old[component]
                .iter()
                .map(|(label, values)| (*label, values.len()))
                .collect();
            for (label, versions) in labels {
                for version in 0..versions {
                    let value = if label == NodeValueLabel::Value {
                        gradients[component].value
                    } else {
                        (0..components)
                            .map(|other| {
                                gradients[component].gradient[other]
                                    * old_parameter(&old, other, label, version)
                            })
                            .sum()
                    };
                    region.write_node_parameter(
                        node,
                        self.target,
                        component,
                        label,
                        version,
                        value,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Evaluates the source once and writes it into every version of the
    /// target's value parameters, leaving derivative parameters untouched.
    fn broadcast_node(
        &self,
        region: &mut Region,
        cache: &mut FieldCache,
        node: NodeId,
        components: usize,
    ) -> Result<(), FieldError> {
        let values = evaluate_field(region, cache, self.source, Location::Node(node))?;
        for component in 0..components {
            for (label, versions) in region.node_component_labels(node, self.target, component)? {
                if label != NodeValueLabel::Value {
                    continue;
                }
                for version in 0..versions {
                    region.write_node_parameter(
                        node,
                        self.target,
                        component,
                        label,
                        version,
                        values[component],
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn old_parameter(
    old: &[Vec<(NodeValueLabel, Vec<f64>)>],
    component: usize,
    label: NodeValueLabel,
    version: usize,
) -> f64 {
    old[component]
        .iter()
        .find(|(stored, _)| *stored == label)
        .and_then(|(_, values)| values.get(version))
        .copied()
        .unwrap_or(0.0)
}
