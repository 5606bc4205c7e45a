use fieldopt::fields::{FieldAssignment, NodeFieldLayout, Region};
use fieldopt::optimization::{
    IntegerAttribute, Method, Optimization, OptimizationError, RealAttribute,
};
use matrixcompare::assert_scalar_eq;

use super::{node_value, set_value, unit_line_region};

#[test]
fn quasi_newton_optimises_constant_parameters() {
    let mut region = Region::new();
    let p = region.create_constant_field("p", &[0.0, 0.0]).unwrap();
    let target = region.create_constant_field("target", &[3.0, -2.0]).unwrap();
    let diff = region.create_subtract_field("diff", p, target).unwrap();
    let squared = region.create_multiply_field("squared", diff, diff).unwrap();

    let mut problem = Optimization::new(&region);
    assert_eq!(problem.method(), Method::QuasiNewton);
    problem.add_dependent_field(&region, p).unwrap();
    problem.add_objective_field(&region, squared).unwrap();
    problem.optimize(&mut region).unwrap();

    let values = region.constant_field_values(p).unwrap();
    assert_scalar_eq!(values[0], 3.0, comp = abs, tol = 1e-5);
    assert_scalar_eq!(values[1], -2.0, comp = abs, tol = 1e-5);
    let report = problem.solution_report();
    assert!(report.contains("Dimension of the problem  = 2"));
    assert!(report.contains("Return code"));
}

#[test]
fn trial_points_flow_through_field_assignments() {
    let mut region = Region::new();
    let c = region.create_constant_field("c", &[0.0]).unwrap();
    let t = region.create_finite_element_field("t", 1).unwrap();
    let d = region.create_finite_element_field("d", 1).unwrap();
    let layout = NodeFieldLayout::value_only(1);
    let n1 = region.create_node(region.nodes(), 1).unwrap();
    let n2 = region.create_node(region.nodes(), 2).unwrap();
    for &node in &[n1, n2] {
        region.define_node_field(node, t, &layout).unwrap();
        region.define_node_field(node, d, &layout).unwrap();
    }
    set_value(&mut region, n1, d, 1.0);
    set_value(&mut region, n2, d, 3.0);
    let misfit = region.create_subtract_field("misfit", t, d).unwrap();
    let objective = region
        .create_nodeset_sum_squares_field("objective", misfit, region.nodes())
        .unwrap();

    // The solver sees (c - 1)^2 + (c - 3)^2 because the assignment copies
    // the trial constant into t before the objective is evaluated.
    let mut problem = Optimization::new(&region);
    problem.add_dependent_field(&region, c).unwrap();
    problem.add_objective_field(&region, objective).unwrap();
    problem.add_field_assignment(FieldAssignment::new(&region, t, c).unwrap());
    problem.optimize(&mut region).unwrap();

    assert_scalar_eq!(
        region.constant_field_values(c).unwrap()[0],
        2.0,
        comp = abs,
        tol = 1e-6
    );
    assert_scalar_eq!(node_value(&region, n1, t), 2.0, comp = abs, tol = 1e-6);
    assert_scalar_eq!(node_value(&region, n2, t), 2.0, comp = abs, tol = 1e-6);
}

#[test]
fn least_squares_fits_a_line_through_datapoints() {
    let mut region = Region::new();
    let x = region.create_finite_element_field("x", 1).unwrap();
    let y = region.create_finite_element_field("y", 1).unwrap();
    let ab = region.create_constant_field("ab", &[0.0, 0.0]).unwrap();
    let layout = NodeFieldLayout::value_only(1);
    for (identifier, sample_x, sample_y) in [(1, 0.0, 1.0), (2, 1.0, 3.0), (3, 2.0, 5.0)] {
        let node = region.create_node(region.datapoints(), identifier).unwrap();
        region.define_node_field(node, x, &layout).unwrap();
        region.define_node_field(node, y, &layout).unwrap();
        set_value(&mut region, node, x, sample_x);
        set_value(&mut region, node, y, sample_y);
    }
    let intercept = region.create_component_field("intercept", ab, 0).unwrap();
    let slope = region.create_component_field("slope", ab, 1).unwrap();
    let trend = region.create_multiply_field("trend", slope, x).unwrap();
    let predicted = region.create_add_field("predicted", intercept, trend).unwrap();
    let misfit = region.create_subtract_field("misfit", predicted, y).unwrap();
    let objective = region
        .create_nodeset_sum_squares_field("objective", misfit, region.datapoints())
        .unwrap();

    let mut problem = Optimization::new(&region);
    problem.set_method(Method::LeastSquaresQuasiNewton);
    problem.add_dependent_field(&region, ab).unwrap();
    problem.add_objective_field(&region, objective).unwrap();
    problem.optimize(&mut region).unwrap();

    // y = 1 + 2 x fits the samples exactly, and the Gauss-Newton direction
    // is exact for a linear model.
    let values = region.constant_field_values(ab).unwrap();
    assert_scalar_eq!(values[0], 1.0, comp = abs, tol = 1e-6);
    assert_scalar_eq!(values[1], 2.0, comp = abs, tol = 1e-6);
    assert!(problem.solution_report().contains("No. iterations taken"));
}

#[test]
fn plain_objective_components_act_as_residual_terms() {
    let mut region = Region::new();
    let p = region.create_constant_field("p", &[0.0]).unwrap();
    let pp = region.create_concatenate_field("pp", &[p, p]).unwrap();
    let offsets = region.create_constant_field("offsets", &[1.0, 4.0]).unwrap();
    let diff = region.create_subtract_field("diff", pp, offsets).unwrap();
    let scale = region.create_constant_field("scale", &[1.0, 2.0]).unwrap();
    let resid = region.create_multiply_field("resid", scale, diff).unwrap();

    // The objective has no sum-of-squares structure, so its raw components
    // (p - 1, 2p - 8) become the residual terms. Minimising their sum of
    // squares gives p = 3.4; squaring the terms again would move the
    // minimiser to about 3.15.
    let mut problem = Optimization::new(&region);
    problem.set_method(Method::LeastSquaresQuasiNewton);
    problem.add_dependent_field(&region, p).unwrap();
    problem.add_objective_field(&region, resid).unwrap();
    problem.optimize(&mut region).unwrap();

    assert_scalar_eq!(
        region.constant_field_values(p).unwrap()[0],
        3.4,
        comp = abs,
        tol = 1e-5
    );
}

#[test]
fn a_newton_step_solves_a_linear_fit_exactly() {
    let (mut region, x, u, [n1, n2]) = unit_line_region();
    let two = region.create_constant_field("two", &[2.0]).unwrap();
    let data = region.create_subtract_field("data", two, x).unwrap();
    let misfit = region.create_subtract_field("misfit", u, data).unwrap();
    let objective = region
        .create_mesh_integral_squares_field("objective", misfit, x, 1, 2)
        .unwrap();

    let mut problem = Optimization::new(&region);
    problem.set_method(Method::Newton);
    problem.add_dependent_field(&region, u).unwrap();
    problem.add_objective_field(&region, objective).unwrap();
    problem.optimize(&mut region).unwrap();

    // The objective is quadratic in the node parameters, so one step lands
    // on the interpolant of 2 - x.
    assert_scalar_eq!(node_value(&region, n1, u), 2.0, comp = abs, tol = 1e-10);
    assert_scalar_eq!(node_value(&region, n2, u), 1.0, comp = abs, tol = 1e-10);
    let report = problem.solution_report();
    assert!(report.contains("Dimension of the problem  = 2"));
    assert!(report.contains("No. elements assembled    = 1"));
    assert!(report.contains("One Newton step applied"));
}

#[test]
fn newton_reports_parameters_outside_every_element() {
    let (mut region, x, u, [n1, n2]) = unit_line_region();
    let outside = region.create_node(region.nodes(), 3).unwrap();
    region
        .define_node_field(outside, u, &NodeFieldLayout::value_only(1))
        .unwrap();
    set_value(&mut region, outside, u, 9.0);
    let two = region.create_constant_field("two", &[2.0]).unwrap();
    let data = region.create_subtract_field("data", two, x).unwrap();
    let misfit = region.create_subtract_field("misfit", u, data).unwrap();
    let objective = region
        .create_mesh_integral_squares_field("objective", misfit, x, 1, 2)
        .unwrap();

    let mut problem = Optimization::new(&region);
    problem.set_method(Method::Newton);
    problem.add_dependent_field(&region, u).unwrap();
    problem.add_objective_field(&region, objective).unwrap();
    problem.optimize(&mut region).unwrap();

    assert_scalar_eq!(node_value(&region, n1, u), 2.0, comp = abs, tol = 1e-10);
    assert_scalar_eq!(node_value(&region, n2, u), 1.0, comp = abs, tol = 1e-10);
    // The parameter of node 3 enters no element, so the step fixes it.
    assert_eq!(node_value(&region, outside, u), 9.0);
    let report = problem.solution_report();
    assert!(report.contains("Dimension of the problem  = 3"));
    assert!(report.contains("Unused parameter fixed: node 3 component 1 label value version 1"));
}

#[test]
fn configuration_errors_are_reported() {
    let mut region = Region::new();
    let p = region.create_constant_field("p", &[0.0]).unwrap();
    let q = region.create_constant_field("q", &[1.0]).unwrap();
    let sum = region.create_add_field("sum", p, q).unwrap();

    let mut problem = Optimization::new(&region);
    assert!(matches!(
        problem.optimize(&mut region),
        Err(OptimizationError::NoDependentFields)
    ));
    problem.add_dependent_field(&region, p).unwrap();
    assert!(matches!(
        problem.optimize(&mut region),
        Err(OptimizationError::NoObjectiveFields)
    ));
    assert!(matches!(
        problem.add_dependent_field(&region, p),
        Err(OptimizationError::DuplicateField)
    ));
    assert!(matches!(
        problem.add_dependent_field(&region, sum),
        Err(OptimizationError::InvalidArgument(_))
    ));
    let other = Region::new();
    assert!(matches!(
        problem.add_dependent_field(&other, p),
        Err(OptimizationError::WrongRegion)
    ));
    assert!(matches!(
        problem.set_conditional_field(&region, q, Some(p)),
        Err(OptimizationError::MissingField)
    ));
}

#[test]
#[allow(deprecated)]
fn independent_field_aliases_delegate() {
    let mut region = Region::new();
    let p = region.create_constant_field("p", &[0.0]).unwrap();
    let mut problem = Optimization::new(&region);
    problem.add_independent_field(&region, p).unwrap();
    assert_eq!(problem.dependent_fields().collect::<Vec<_>>(), vec![p]);
    problem.remove_independent_field(p).unwrap();
    assert_eq!(problem.dependent_fields().count(), 0);
}

#[test]
fn attributes_have_conventional_defaults_and_validate_writes() {
    let region = Region::new();
    let mut problem = Optimization::new(&region);
    let real_defaults = [
        (RealAttribute::FunctionTolerance, 1.49012e-8),
        (RealAttribute::GradientTolerance, 6.05545e-6),
        (RealAttribute::StepTolerance, 1.49012e-8),
        (RealAttribute::MaximumStep, 1.0e3),
        (RealAttribute::MinimumStep, 1.49012e-8),
        (RealAttribute::LinesearchTolerance, 1.0e-4),
        (RealAttribute::TrustRegionSize, 0.1),
    ];
    for (attribute, expected) in real_defaults {
        assert_eq!(problem.real_attribute(attribute), expected);
    }
    let integer_defaults = [
        (IntegerAttribute::MaximumIterations, 100),
        (IntegerAttribute::MaximumFunctionEvaluations, 1000),
        (IntegerAttribute::MaximumBacktrackIterations, 5),
    ];
    for (attribute, expected) in integer_defaults {
        assert_eq!(problem.integer_attribute(attribute), expected);
    }

    problem
        .set_real_attribute(RealAttribute::GradientTolerance, 1e-3)
        .unwrap();
    assert_eq!(problem.real_attribute(RealAttribute::GradientTolerance), 1e-3);
    problem
        .set_integer_attribute(IntegerAttribute::MaximumIterations, 7)
        .unwrap();
    assert_eq!(problem.integer_attribute(IntegerAttribute::MaximumIterations), 7);

    assert!(matches!(
        problem.set_real_attribute(RealAttribute::StepTolerance, -1.0),
        Err(OptimizationError::InvalidAttributeValue(_))
    ));
    assert!(matches!(
        problem.set_real_attribute(RealAttribute::StepTolerance, f64::NAN),
        Err(OptimizationError::InvalidAttributeValue(_))
    ));
    assert!(matches!(
        problem.set_integer_attribute(IntegerAttribute::MaximumIterations, -1),
        Err(OptimizationError::InvalidAttributeValue(_))
    ));
}

#[test]
fn an_optimisation_emits_one_coalesced_change_event() {
    let mut region = Region::new();
    let p = region.create_constant_field("p", &[0.0]).unwrap();
    let target = region.create_constant_field("target", &[5.0]).unwrap();
    let diff = region.create_subtract_field("diff", p, target).unwrap();
    let squared = region.create_multiply_field("squared", diff, diff).unwrap();

    let mut problem = Optimization::new(&region);
    problem.add_dependent_field(&region, p).unwrap();
    problem.add_objective_field(&region, squared).unwrap();
    region.take_change_events();
    problem.optimize(&mut region).unwrap();

    // Every trial write and the final write-back sit inside one change
    // bracket.
    let events = region.take_change_events();
    assert_eq!(events.len(), 1);
    assert!(events[0].fields.contains(&p));
    assert_scalar_eq!(
        region.constant_field_values(p).unwrap()[0],
        5.0,
        comp = abs,
        tol = 1e-6
    );
}
