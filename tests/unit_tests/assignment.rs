use fieldopt::fields::{
    AssignmentOutcome, FieldAssignment, FieldError, NodeFieldLayout, NodeValueLabel, Region,
};
use matrixcompare::assert_scalar_eq;

use super::{node_value, set_value};

#[test]
fn finite_element_source_copies_parameters_label_by_label() {
    let mut region = Region::new();
    let target = region.create_finite_element_field("target", 1).unwrap();
    let source = region.create_finite_element_field("source", 1).unwrap();
    let layout = NodeFieldLayout::uniform(1, &[(NodeValueLabel::Value, 1), (NodeValueLabel::Ds1, 1)]);
    let node = region.create_node(region.nodes(), 1).unwrap();
    region.define_node_field(node, target, &layout).unwrap();
    region.define_node_field(node, source, &layout).unwrap();
    region
        .set_node_parameter(node, source, 0, NodeValueLabel::Value, 0, 4.0)
        .unwrap();
    region
        .set_node_parameter(node, source, 0, NodeValueLabel::Ds1, 0, -1.5)
        .unwrap();

    let assignment = FieldAssignment::new(&region, target, source).unwrap();
    assert_eq!(assignment.assign(&mut region).unwrap(), AssignmentOutcome::Complete);
    assert_eq!(
        region
            .node_parameter(node, target, 0, NodeValueLabel::Value, 0)
            .unwrap(),
        4.0
    );
    assert_eq!(
        region
            .node_parameter(node, target, 0, NodeValueLabel::Ds1, 0)
            .unwrap(),
        -1.5
    );
}

#[test]
fn broadcast_source_fills_only_value_parameters() {
    let mut region = Region::new();
    let target = region.create_finite_element_field("target", 1).unwrap();
    let seven = region.create_constant_field("seven", &[7.0]).unwrap();
    let layout = NodeFieldLayout::uniform(1, &[(NodeValueLabel::Value, 2), (NodeValueLabel::Ds1, 1)]);
    let node = region.create_node(region.nodes(), 1).unwrap();
    region.define_node_field(node, target, &layout).unwrap();
    region
        .set_node_parameter(node, target, 0, NodeValueLabel::Ds1, 0, 0.25)
        .unwrap();

    let assignment = FieldAssignment::new(&region, target, seven).unwrap();
    assert_eq!(assignment.assign(&mut region).unwrap(), AssignmentOutcome::Complete);
    assert_eq!(
        region
            .node_parameter(node, target, 0, NodeValueLabel::Value, 0)
            .unwrap(),
        7.0
    );
    assert_eq!(
        region
            .node_parameter(node, target, 0, NodeValueLabel::Value, 1)
            .unwrap(),
        7.0
    );
    // Derivative parameters are untouched by a broadcast.
    assert_eq!(
        region
            .node_parameter(node, target, 0, NodeValueLabel::Ds1, 0)
            .unwrap(),
        0.25
    );
}

#[test]
fn functional_source_updates_derivatives_through_the_chain_rule() {
    let mut region = Region::new();
    let u = region.create_finite_element_field("u", 1).unwrap();
    let squared = region.create_multiply_field("squared", u, u).unwrap();
    let layout = NodeFieldLayout::uniform(1, &[(NodeValueLabel::Value, 1), (NodeValueLabel::Ds1, 1)]);
    let node = region.create_node(region.nodes(), 1).unwrap();
    region.define_node_field(node, u, &layout).unwrap();
    region
        .set_node_parameter(node, u, 0, NodeValueLabel::Value, 0, 3.0)
        .unwrap();
    region
        .set_node_parameter(node, u, 0, NodeValueLabel::Ds1, 0, 0.5)
        .unwrap();

    let assignment = FieldAssignment::new(&region, u, squared).unwrap();
    assert_eq!(assignment.assign(&mut region).unwrap(), AssignmentOutcome::Complete);
    // u ends up as u^2 = 9 and d(u^2)/ds1 = 2 u u' = 3.
    assert_scalar_eq!(
        region
            .node_parameter(node, u, 0, NodeValueLabel::Value, 0)
            .unwrap(),
        9.0,
        comp = abs,
        tol = 1e-14
    );
    assert_scalar_eq!(
        region
            .node_parameter(node, u, 0, NodeValueLabel::Ds1, 0)
            .unwrap(),
        3.0,
        comp = abs,
        tol = 1e-14
    );
}

#[test]
fn conditional_field_masks_nodes_without_counting_them() {
    let mut region = Region::new();
    let target = region.create_finite_element_field("target", 1).unwrap();
    let mask = region.create_finite_element_field("mask", 1).unwrap();
    let five = region.create_constant_field("five", &[5.0]).unwrap();
    let layout = NodeFieldLayout::value_only(1);
    let n1 = region.create_node(region.nodes(), 1).unwrap();
    let n2 = region.create_node(region.nodes(), 2).unwrap();
    for &node in &[n1, n2] {
        region.define_node_field(node, target, &layout).unwrap();
        region.define_node_field(node, mask, &layout).unwrap();
    }
    set_value(&mut region, n1, mask, 1.0);
    set_value(&mut region, n2, mask, 0.0);

    let mut assignment = FieldAssignment::new(&region, target, five).unwrap();
    assignment.set_conditional_field(&region, Some(mask)).unwrap();
    assert_eq!(assignment.assign(&mut region).unwrap(), AssignmentOutcome::Complete);
    assert_eq!(node_value(&region, n1, target), 5.0);
    assert_eq!(node_value(&region, n2, target), 0.0);
}

#[test]
fn assignment_respects_a_nodeset_restriction() {
    let mut region = Region::new();
    let target = region.create_finite_element_field("target", 1).unwrap();
    let three = region.create_constant_field("three", &[3.0]).unwrap();
    let layout = NodeFieldLayout::value_only(1);
    let n1 = region.create_node(region.nodes(), 1).unwrap();
    let n2 = region.create_node(region.nodes(), 2).unwrap();
    region.define_node_field(n1, target, &layout).unwrap();
    region.define_node_field(n2, target, &layout).unwrap();
    let left = region.create_nodeset_group("left").unwrap();
    region.add_node_to_group(left, n1).unwrap();

    let mut assignment = FieldAssignment::new(&region, target, three).unwrap();
    assignment.set_nodeset(&region, Some(left)).unwrap();
    assert_eq!(assignment.assign(&mut region).unwrap(), AssignmentOutcome::Complete);
    assert_eq!(node_value(&region, n1, target), 3.0);
    assert_eq!(node_value(&region, n2, target), 0.0);
}

#[test]
fn nodes_without_target_storage_are_counted_as_skipped() {
    let mut region = Region::new();
    let target = region.create_finite_element_field("target", 1).unwrap();
    let three = region.create_constant_field("three", &[3.0]).unwrap();
    let layout = NodeFieldLayout::value_only(1);
    let n1 = region.create_node(region.nodes(), 1).unwrap();
    let _n2 = region.create_node(region.nodes(), 2).unwrap();
    region.define_node_field(n1, target, &layout).unwrap();

    let assignment = FieldAssignment::new(&region, target, three).unwrap();
    assert_eq!(
        assignment.assign(&mut region).unwrap(),
        AssignmentOutcome::Partial { skipped: 1 }
    );
    assert_eq!(node_value(&region, n1, target), 3.0);
}

#[test]
fn assignment_fails_when_no_node_can_be_assigned() {
    let mut region = Region::new();
    let target = region.create_finite_element_field("target", 1).unwrap();
    let three = region.create_constant_field("three", &[3.0]).unwrap();
    region.create_node(region.nodes(), 1).unwrap();
    region.create_node(region.nodes(), 2).unwrap();

    let assignment = FieldAssignment::new(&region, target, three).unwrap();
    assert_eq!(
        assignment.assign(&mut region),
        Err(FieldError::AssignmentFailed)
    );
}
