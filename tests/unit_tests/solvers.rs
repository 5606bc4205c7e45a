use fieldopt::solvers::{
    least_squares_quasi_newton, quasi_newton, BacktrackingLineSearch, LineSearch,
    ObjectiveFunction, ResidualFunction, SolverError, SolverSettings, StopReason,
};
use matrixcompare::assert_scalar_eq;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use proptest::prelude::*;
use std::error::Error;

/// f(x, y) = (x - 3)^2 + (y + 2)^2, minimised at (3, -2).
struct Quadratic;

impl ObjectiveFunction for Quadratic {
    fn dimension(&self) -> usize {
        2
    }

    fn evaluate(&mut self, x: &DVectorView<f64>) -> Result<f64, Box<dyn Error>> {
        Ok((x[0] - 3.0).powi(2) + (x[1] + 2.0).powi(2))
    }
}

struct Cosine;

impl ObjectiveFunction for Cosine {
    fn dimension(&self) -> usize {
        1
    }

    fn evaluate(&mut self, x: &DVectorView<f64>) -> Result<f64, Box<dyn Error>> {
        Ok(x[0].cos())
    }
}

struct Parabola;

impl ObjectiveFunction for Parabola {
    fn dimension(&self) -> usize {
        1
    }

    fn evaluate(&mut self, x: &DVectorView<f64>) -> Result<f64, Box<dyn Error>> {
        Ok(x[0] * x[0])
    }
}

/// Residuals (x0 - 1, x1 - 2, x0 + x1 - 3), all zero at (1, 2).
struct Affine;

impl ResidualFunction for Affine {
    fn dimension(&self) -> usize {
        2
    }

    fn residual_count(&self) -> usize {
        3
    }

    fn evaluate_into(
        &mut self,
        r: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
    ) -> Result<(), Box<dyn Error>> {
        r[0] = x[0] - 1.0;
        r[1] = x[1] - 2.0;
        r[2] = x[0] + x[1] - 3.0;
        Ok(())
    }
}

#[test]
fn quasi_newton_finds_the_minimum_of_a_quadratic() {
    let settings = SolverSettings::default();
    let outcome = quasi_newton(Quadratic, DVector::zeros(2), &settings).unwrap();
    assert!(outcome.stop.is_converged());
    assert_scalar_eq!(outcome.solution[0], 3.0, comp = abs, tol = 1e-6);
    assert_scalar_eq!(outcome.solution[1], -2.0, comp = abs, tol = 1e-6);
    assert!(outcome.final_value < 1e-10);
}

#[test]
fn iteration_limit_stops_an_unconverged_run() {
    let settings = SolverSettings {
        maximum_iterations: 1,
        ..SolverSettings::default()
    };
    let outcome = quasi_newton(Cosine, DVector::from_element(1, 1.0), &settings).unwrap();
    assert_eq!(outcome.stop, StopReason::IterationLimit);
    assert_eq!(outcome.stop.code(), 4);
    assert!(!outcome.stop.is_converged());
    assert_eq!(outcome.iterations, 1);
}

#[test]
fn the_evaluation_budget_stops_a_run_before_it_iterates() {
    let settings = SolverSettings {
        maximum_function_evaluations: 1,
        ..SolverSettings::default()
    };
    let outcome = quasi_newton(Cosine, DVector::from_element(1, 0.5), &settings).unwrap();
    assert_eq!(outcome.stop, StopReason::EvaluationLimit);
    assert_eq!(outcome.iterations, 0);
    // The initial value and its central difference gradient are always
    // evaluated before the budget is checked.
    assert_eq!(outcome.function_evaluations, 3);
    assert_eq!(outcome.solution[0], 0.5);
}

#[test]
fn degenerate_starting_points_are_rejected() {
    let settings = SolverSettings::default();
    assert!(matches!(
        quasi_newton(Quadratic, DVector::zeros(0), &settings),
        Err(SolverError::EmptyProblem)
    ));
    assert!(matches!(
        quasi_newton(Quadratic, DVector::zeros(3), &settings),
        Err(SolverError::DimensionMismatch {
            expected: 2,
            found: 3
        })
    ));
    assert!(matches!(
        least_squares_quasi_newton(Affine, DVector::zeros(0), &settings),
        Err(SolverError::EmptyProblem)
    ));
}

#[test]
fn backtracking_halves_until_armijo_accepts() {
    let settings = SolverSettings::default();
    let mut line_search = BacktrackingLineSearch::new(&settings);
    let mut x = DVector::from_element(1, 1.0);
    let direction = DVector::from_element(1, -2.0);
    // The full step overshoots to -1 where the value has not decreased, so
    // one halving is needed.
    let outcome = line_search
        .step(
            &mut Parabola,
            DVectorViewMut::from(&mut x),
            DVectorView::from(&direction),
            1.0,
            -4.0,
        )
        .unwrap();
    assert_eq!(outcome.step_length, 0.5);
    assert_eq!(outcome.value, 0.0);
    assert_eq!(outcome.evaluations, 2);
    assert_eq!(x[0], 0.0);
}

#[test]
fn backtracking_restores_x_when_no_step_is_acceptable() {
    let settings = SolverSettings::default();
    let mut line_search = BacktrackingLineSearch::new(&settings);
    let mut x = DVector::from_element(1, 1.0);
    // An ascent direction never satisfies the sufficient decrease test.
    let direction = DVector::from_element(1, 2.0);
    let error = line_search
        .step(
            &mut Parabola,
            DVectorViewMut::from(&mut x),
            DVectorView::from(&direction),
            1.0,
            4.0,
        )
        .unwrap_err();
    assert!(error.to_string().contains("no acceptable step"));
    assert_eq!(x[0], 1.0);
}

#[test]
fn gauss_newton_solves_a_linear_least_squares_problem() {
    let settings = SolverSettings::default();
    let outcome = least_squares_quasi_newton(Affine, DVector::zeros(2), &settings).unwrap();
    assert!(outcome.stop.is_converged());
    // The Gauss-Newton direction is exact for affine residuals.
    assert_eq!(outcome.iterations, 1);
    assert_scalar_eq!(outcome.solution[0], 1.0, comp = abs, tol = 1e-8);
    assert_scalar_eq!(outcome.solution[1], 2.0, comp = abs, tol = 1e-8);
}

#[test]
fn stop_reasons_carry_their_return_codes() {
    let reasons = [
        (StopReason::StepTolerance, 1, true),
        (StopReason::FunctionTolerance, 2, true),
        (StopReason::GradientTolerance, 3, true),
        (StopReason::IterationLimit, 4, false),
        (StopReason::EvaluationLimit, 5, false),
        (StopReason::LineSearchFailed, -1, false),
    ];
    for (reason, code, converged) in reasons {
        assert_eq!(reason.code(), code);
        assert_eq!(reason.is_converged(), converged);
    }
    assert_eq!(
        StopReason::GradientTolerance.to_string(),
        "gradient tolerance reached"
    );
}

struct ShiftedParabola {
    scale: f64,
    shift: f64,
}

impl ObjectiveFunction for ShiftedParabola {
    fn dimension(&self) -> usize {
        1
    }

    fn evaluate(&mut self, x: &DVectorView<f64>) -> Result<f64, Box<dyn Error>> {
        Ok(self.scale * (x[0] - self.shift).powi(2))
    }
}

proptest! {
    #[test]
    fn quasi_newton_minimises_shifted_parabolas(
        scale in 0.5..4.0f64,
        shift in prop_oneof![-5.0..-0.5f64, 0.5..5.0f64],
    ) {
        let settings = SolverSettings::default();
        let function = ShiftedParabola { scale, shift };
        let outcome = quasi_newton(function, DVector::zeros(1), &settings).unwrap();
        prop_assert!(outcome.stop.is_converged());
        prop_assert!((outcome.solution[0] - shift).abs() < 1e-4);
    }
}
