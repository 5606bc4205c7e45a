use fieldopt::fields::{FieldCache, FieldError, Location, NodeFieldLayout, Region};
use matrixcompare::assert_scalar_eq;

use super::{set_value, unit_line_region};

#[test]
fn arithmetic_fields_evaluate_componentwise() {
    let mut region = Region::new();
    let c = region.create_constant_field("c", &[1.0, 2.0]).unwrap();
    let d = region.create_constant_field("d", &[3.0, 4.0]).unwrap();
    let s = region.create_constant_field("s", &[2.0]).unwrap();
    let sum = region.create_add_field("sum", c, d).unwrap();
    let difference = region.create_subtract_field("difference", c, d).unwrap();
    let scaled = region.create_multiply_field("scaled", s, d).unwrap();
    let second = region.create_component_field("second", d, 1).unwrap();
    let stacked = region.create_concatenate_field("stacked", &[c, d]).unwrap();
    let total = region.create_sum_components_field("total", stacked).unwrap();

    let mut cache = FieldCache::new();
    let evaluate = |region: &Region, cache: &mut FieldCache, field| {
        region.evaluate(cache, field, Location::None).unwrap()
    };
    assert_eq!(evaluate(&region, &mut cache, sum), vec![4.0, 6.0]);
    assert_eq!(evaluate(&region, &mut cache, difference), vec![-2.0, -2.0]);
    assert_eq!(evaluate(&region, &mut cache, scaled), vec![6.0, 8.0]);
    assert_eq!(evaluate(&region, &mut cache, second), vec![4.0]);
    assert_eq!(evaluate(&region, &mut cache, stacked), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(evaluate(&region, &mut cache, total), vec![10.0]);
}

#[test]
fn mismatched_operands_are_rejected() {
    let mut region = Region::new();
    let narrow = region.create_constant_field("narrow", &[1.0, 2.0]).unwrap();
    let wide = region.create_constant_field("wide", &[1.0, 2.0, 3.0]).unwrap();
    assert!(matches!(
        region.create_add_field("bad", narrow, wide),
        Err(FieldError::ComponentMismatch { expected: 2, found: 3 })
    ));
    assert!(matches!(
        region.create_constant_field("narrow", &[0.0]),
        Err(FieldError::DuplicateName(_))
    ));
}

#[test]
fn finite_element_fields_interpolate_linearly() {
    let (mut region, _x, u, [n1, n2]) = unit_line_region();
    set_value(&mut region, n1, u, 2.0);
    set_value(&mut region, n2, u, 6.0);
    let element = region.mesh_elements(1).unwrap().next().unwrap();

    let mut cache = FieldCache::new();
    let at_node = region.evaluate(&mut cache, u, Location::Node(n2)).unwrap();
    assert_eq!(at_node, vec![6.0]);
    let location = Location::Element {
        element,
        xi: [0.25, 0.0, 0.0],
    };
    let mid = region.evaluate(&mut cache, u, location).unwrap();
    assert_scalar_eq!(mid[0], 3.0, comp = abs, tol = 1e-14);
}

#[test]
fn nodeset_sum_skips_undefined_nodes() {
    let mut region = Region::new();
    let u = region.create_finite_element_field("u", 1).unwrap();
    let n1 = region.create_node(region.nodes(), 1).unwrap();
    let n2 = region.create_node(region.nodes(), 2).unwrap();
    let _n3 = region.create_node(region.nodes(), 3).unwrap();
    let layout = NodeFieldLayout::value_only(1);
    region.define_node_field(n1, u, &layout).unwrap();
    region.define_node_field(n2, u, &layout).unwrap();
    set_value(&mut region, n1, u, 2.0);
    set_value(&mut region, n2, u, 5.0);
    let total = region
        .create_nodeset_sum_field("total", u, region.nodes())
        .unwrap();

    let mut cache = FieldCache::new();
    assert_eq!(
        region.evaluate(&mut cache, total, Location::None).unwrap(),
        vec![7.0]
    );

    // A field defined at no node of the set leaves the sum undefined.
    let v = region.create_finite_element_field("v", 1).unwrap();
    let empty = region
        .create_nodeset_sum_field("empty", v, region.nodes())
        .unwrap();
    assert_eq!(
        region.evaluate(&mut cache, empty, Location::None),
        Err(FieldError::Undefined)
    );
}

#[test]
fn mesh_integral_weighs_by_element_measure() {
    let (mut region, x, _u, [_n1, n2]) = unit_line_region();
    // Stretch the element to length 2.
    set_value(&mut region, n2, x, 2.0);
    let one = region.create_constant_field("one", &[1.0]).unwrap();
    let length = region
        .create_mesh_integral_field("length", one, x, 1, 2)
        .unwrap();

    let mut cache = FieldCache::new();
    let value = region.evaluate(&mut cache, length, Location::None).unwrap();
    assert_scalar_eq!(value[0], 2.0, comp = abs, tol = 1e-13);
}

#[test]
fn squared_mesh_integral_matches_the_analytic_integral() {
    let (mut region, x, u, [n1, n2]) = unit_line_region();
    set_value(&mut region, n1, u, 0.0);
    set_value(&mut region, n2, u, 1.0);
    let objective = region
        .create_mesh_integral_squares_field("objective", u, x, 1, 2)
        .unwrap();

    let mut cache = FieldCache::new();
    let value = region
        .evaluate(&mut cache, objective, Location::None)
        .unwrap();
    // int_0^1 xi^2 dxi
    assert_scalar_eq!(value[0], 1.0 / 3.0, comp = abs, tol = 1e-14);
}

#[test]
fn nodeset_terms_reproduce_the_sum_of_squares_value() {
    let mut region = Region::new();
    let u = region.create_finite_element_field("u", 1).unwrap();
    let layout = NodeFieldLayout::value_only(1);
    let values = [1.5, -2.0, 0.5];
    for (index, &value) in values.iter().enumerate() {
        let node = region.create_node(region.nodes(), index as u32 + 1).unwrap();
        region.define_node_field(node, u, &layout).unwrap();
        set_value(&mut region, node, u, value);
    }
    let squares = region
        .create_nodeset_sum_squares_field("squares", u, region.nodes())
        .unwrap();

    let mut cache = FieldCache::new();
    let layout = region
        .sum_square_term_layout(&mut cache, squares)
        .unwrap()
        .unwrap();
    assert_eq!((layout.term_count, layout.term_length), (3, 1));

    let mut terms = Vec::new();
    region
        .evaluate_sum_square_terms(&mut cache, squares, &mut terms)
        .unwrap();
    assert_eq!(terms, values);

    let from_terms: f64 = terms.iter().map(|term| term * term).sum();
    let direct = region.evaluate(&mut cache, squares, Location::None).unwrap()[0];
    assert_scalar_eq!(from_terms, direct, comp = abs, tol = 1e-12);
}

#[test]
fn gauss_point_terms_reproduce_the_integral_value() {
    let (mut region, x, u, [n1, n2]) = unit_line_region();
    set_value(&mut region, n1, u, 0.5);
    set_value(&mut region, n2, u, -1.5);
    let squares = region
        .create_mesh_integral_squares_field("squares", u, x, 1, 3)
        .unwrap();

    let mut cache = FieldCache::new();
    let layout = region
        .sum_square_term_layout(&mut cache, squares)
        .unwrap()
        .unwrap();
    // One element, three Gauss points.
    assert_eq!((layout.term_count, layout.term_length), (3, 1));

    let mut terms = Vec::new();
    region
        .evaluate_sum_square_terms(&mut cache, squares, &mut terms)
        .unwrap();
    let from_terms: f64 = terms.iter().map(|term| term * term).sum();
    let direct = region.evaluate(&mut cache, squares, Location::None).unwrap()[0];
    assert_scalar_eq!(from_terms, direct, comp = abs, tol = 1e-12);
}

#[test]
fn change_events_coalesce_inside_a_bracket() {
    let (mut region, x, u, [n1, _n2]) = unit_line_region();
    region.take_change_events();

    region.begin_change();
    set_value(&mut region, n1, u, 1.0);
    set_value(&mut region, n1, x, 0.5);
    assert!(region.take_change_events().is_empty());
    region.end_change();

    let events = region.take_change_events();
    assert_eq!(events.len(), 1);
    assert!(events[0].fields.contains(&u));
    assert!(events[0].fields.contains(&x));

    // Outside a bracket every change flushes immediately.
    set_value(&mut region, n1, u, 2.0);
    assert_eq!(region.take_change_events().len(), 1);
}
