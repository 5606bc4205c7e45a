use fieldopt::fields::{
    DofHandle, FieldError, NodeFieldLayout, NodeValueLabel, Region,
};
use fieldopt::optimization::dof;
use nalgebra::DVector;

use super::set_value;

#[test]
fn collection_walks_nodes_components_labels_and_versions_in_order() {
    let mut region = Region::new();
    let u = region.create_finite_element_field("u", 2).unwrap();
    let c = region.create_constant_field("c", &[4.0, 5.0, 6.0]).unwrap();
    let mut layout = NodeFieldLayout::value_only(2);
    layout
        .set_component_labels(0, &[(NodeValueLabel::Value, 1), (NodeValueLabel::Ds1, 2)])
        .unwrap();
    // Created out of identifier order on purpose.
    let second = region.create_node(region.nodes(), 2).unwrap();
    let first = region.create_node(region.nodes(), 1).unwrap();
    region.define_node_field(second, u, &layout).unwrap();
    region.define_node_field(first, u, &layout).unwrap();
    for (node, base) in [(first, 1.0), (second, 2.0)] {
        region
            .set_node_parameter(node, u, 0, NodeValueLabel::Value, 0, base)
            .unwrap();
        region
            .set_node_parameter(node, u, 0, NodeValueLabel::Ds1, 0, base + 0.1)
            .unwrap();
        region
            .set_node_parameter(node, u, 0, NodeValueLabel::Ds1, 1, base + 0.2)
            .unwrap();
        region
            .set_node_parameter(node, u, 1, NodeValueLabel::Value, 0, base + 0.5)
            .unwrap();
    }

    let dofs = dof::collect(&region, &[(u, None), (c, None)]).unwrap();
    assert_eq!(dofs.len(), 11);
    let node_handle = |node, component, label, version| DofHandle::NodeParameter {
        node,
        field: u,
        component,
        label,
        version,
    };
    let expected = vec![
        node_handle(first, 0, NodeValueLabel::Value, 0),
        node_handle(first, 0, NodeValueLabel::Ds1, 0),
        node_handle(first, 0, NodeValueLabel::Ds1, 1),
        node_handle(first, 1, NodeValueLabel::Value, 0),
        node_handle(second, 0, NodeValueLabel::Value, 0),
        node_handle(second, 0, NodeValueLabel::Ds1, 0),
        node_handle(second, 0, NodeValueLabel::Ds1, 1),
        node_handle(second, 1, NodeValueLabel::Value, 0),
        DofHandle::ConstantComponent { field: c, component: 0 },
        DofHandle::ConstantComponent { field: c, component: 1 },
        DofHandle::ConstantComponent { field: c, component: 2 },
    ];
    let handles: Vec<DofHandle> = dofs.dofs().iter().map(|dof| dof.handle).collect();
    assert_eq!(handles, expected);
    assert_eq!(
        dofs.initial_values(),
        DVector::from_vec(vec![1.0, 1.1, 1.2, 1.5, 2.0, 2.1, 2.2, 2.5, 4.0, 5.0, 6.0])
    );
}

#[test]
fn scalar_conditional_drops_whole_nodes() {
    let mut region = Region::new();
    let u = region.create_finite_element_field("u", 1).unwrap();
    let mask = region.create_finite_element_field("mask", 1).unwrap();
    let layout = NodeFieldLayout::value_only(1);
    let mut nodes = Vec::new();
    for identifier in 1..=4 {
        let node = region.create_node(region.nodes(), identifier).unwrap();
        region.define_node_field(node, u, &layout).unwrap();
        nodes.push(node);
    }
    // The mask stays undefined at the fourth node, which drops it too.
    for (index, value) in [(0, 1.0), (1, 0.0), (2, 2.0)] {
        region.define_node_field(nodes[index], mask, &layout).unwrap();
        set_value(&mut region, nodes[index], mask, value);
    }

    let dofs = dof::collect(&region, &[(u, Some(mask))]).unwrap();
    assert_eq!(dofs.len(), 2);
    let kept: Vec<_> = dofs
        .dofs()
        .iter()
        .map(|dof| match dof.handle {
            DofHandle::NodeParameter { node, .. } => node,
            DofHandle::ConstantComponent { .. } => panic!("expected node parameters"),
        })
        .collect();
    assert_eq!(kept, vec![nodes[0], nodes[2]]);
}

#[test]
fn component_conditional_drops_components_individually() {
    let mut region = Region::new();
    let u = region.create_finite_element_field("u", 2).unwrap();
    let mask = region.create_finite_element_field("mask", 2).unwrap();
    let layout = NodeFieldLayout::value_only(2);
    let n1 = region.create_node(region.nodes(), 1).unwrap();
    let n2 = region.create_node(region.nodes(), 2).unwrap();
    for &node in &[n1, n2] {
        region.define_node_field(node, u, &layout).unwrap();
        region.define_node_field(node, mask, &layout).unwrap();
    }
    region
        .set_node_parameter(n1, mask, 0, NodeValueLabel::Value, 0, 1.0)
        .unwrap();
    region
        .set_node_parameter(n2, mask, 0, NodeValueLabel::Value, 0, 1.0)
        .unwrap();
    region
        .set_node_parameter(n2, mask, 1, NodeValueLabel::Value, 0, 1.0)
        .unwrap();

    let dofs = dof::collect(&region, &[(u, Some(mask))]).unwrap();
    let kept: Vec<_> = dofs
        .dofs()
        .iter()
        .map(|dof| match dof.handle {
            DofHandle::NodeParameter { node, component, .. } => (node, component),
            DofHandle::ConstantComponent { .. } => panic!("expected node parameters"),
        })
        .collect();
    assert_eq!(kept, vec![(n1, 0), (n2, 0), (n2, 1)]);
}

#[test]
fn constant_components_use_a_location_free_conditional() {
    let mut region = Region::new();
    let c = region.create_constant_field("c", &[10.0, 20.0]).unwrap();
    let mask = region.create_constant_field("mask", &[1.0, 0.0]).unwrap();

    let dofs = dof::collect(&region, &[(c, Some(mask))]).unwrap();
    assert_eq!(dofs.len(), 1);
    assert_eq!(
        dofs.dofs()[0].handle,
        DofHandle::ConstantComponent { field: c, component: 0 }
    );
    assert_eq!(dofs.dofs()[0].initial_value, 10.0);

    // A conditional with no node definitions is undefined without a
    // location, which drops the constant field entirely.
    let gate = region.create_finite_element_field("gate", 1).unwrap();
    let dofs = dof::collect(&region, &[(c, Some(gate))]).unwrap();
    assert!(dofs.is_empty());
}

#[test]
fn write_values_round_trips_through_storage() {
    let mut region = Region::new();
    let u = region.create_finite_element_field("u", 1).unwrap();
    let layout = NodeFieldLayout::value_only(1);
    let n1 = region.create_node(region.nodes(), 1).unwrap();
    let n2 = region.create_node(region.nodes(), 2).unwrap();
    region.define_node_field(n1, u, &layout).unwrap();
    region.define_node_field(n2, u, &layout).unwrap();
    set_value(&mut region, n1, u, 1.0);
    set_value(&mut region, n2, u, 2.0);

    let dofs = dof::collect(&region, &[(u, None)]).unwrap();
    dofs.write_values(&mut region, &[7.5, -3.25]).unwrap();
    assert_eq!(
        region
            .node_parameter(n1, u, 0, NodeValueLabel::Value, 0)
            .unwrap(),
        7.5
    );
    assert_eq!(
        region
            .node_parameter(n2, u, 0, NodeValueLabel::Value, 0)
            .unwrap(),
        -3.25
    );
    assert!(matches!(
        dofs.write_values(&mut region, &[1.0]),
        Err(FieldError::InvalidArgument(_))
    ));
}
