use fieldopt_matrix::{Factor, Matrix};
use log::debug;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use std::error::Error;

use super::line_search::{BacktrackingLineSearch, LineSearch};
use super::quasi_newton::ObjectiveFunction;
use super::{SolveOutcome, SolverError, SolverSettings, StopReason};

/// A residual vector over a flat parameter vector. The implied objective is
/// the sum of squared residuals.
pub trait ResidualFunction {
    fn dimension(&self) -> usize;
    fn residual_count(&self) -> usize;
    fn evaluate_into(
        &mut self,
        r: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
    ) -> Result<(), Box<dyn Error>>;
}

impl<X: ResidualFunction> ResidualFunction for &mut X {
    fn dimension(&self) -> usize {
        X::dimension(self)
    }

    fn residual_count(&self) -> usize {
        X::residual_count(self)
    }

    fn evaluate_into(
        &mut self,
        r: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
    ) -> Result<(), Box<dyn Error>> {
        X::evaluate_into(self, r, x)
    }
}

/// Minimises the sum of squared residuals with a Gauss-Newton iteration.
///
/// The residual Jacobian is estimated with central differences. Each step
/// solves the normal equations `(J^T J) d = -J^T r` through an LU
/// factorisation; when the normal matrix is singular the step falls back to
/// steepest descent on the sum of squares. Steps pass through the same
/// Armijo backtracking search as the quasi-Newton solver.
pub fn least_squares_quasi_newton<F>(
    mut function: F,
    x0: DVector<f64>,
    settings: &SolverSettings,
) -> Result<SolveOutcome, SolverError>
where
    F: ResidualFunction,
{
    let n = x0.len();
    let m = function.residual_count();
    if n == 0 {
        return Err(SolverError::EmptyProblem);
    }
    if function.dimension() != n {
        return Err(SolverError::DimensionMismatch {
            expected: function.dimension(),
            found: n,
        });
    }
    let mut evaluations = 0usize;
    let mut x = x0;
    let mut residual = DVector::zeros(m);
    let mut objective = SumOfSquares {
        function: &mut function,
        residual: &mut residual,
    };
    let mut value = objective
        .evaluate(&DVectorView::from(&x))
        .map_err(SolverError::Evaluation)?;
    evaluations += 1;
    let mut line_search = BacktrackingLineSearch::new(settings);
    let mut iterations = 0usize;

    let stop = loop {
        let jacobian = central_difference_jacobian(&mut objective, &mut x, &mut evaluations)?;
        let gradient = 2.0 * (jacobian.transpose() * &*objective.residual);

        if gradient.norm() <= settings.gradient_tolerance * (1.0 + value.abs()) {
            break StopReason::GradientTolerance;
        }
        if iterations >= settings.maximum_iterations {
            break StopReason::IterationLimit;
        }
        if evaluations >= settings.maximum_function_evaluations {
            break StopReason::EvaluationLimit;
        }

        let mut direction = gauss_newton_direction(&jacobian, objective.residual)
            .unwrap_or_else(|| {
                debug!("normal equations singular, falling back to steepest descent");
                -&gradient
            });
        let mut directional = direction.dot(&gradient);
        if directional >= 0.0 {
            direction = -&gradient;
            directional = -gradient.norm_squared();
        }
        let direction_norm = direction.norm();
        if direction_norm > settings.maximum_step {
            direction *= settings.maximum_step / direction_norm;
            directional = direction.dot(&gradient);
        }

        let outcome = match line_search.step(
            &mut objective,
            DVectorViewMut::from(&mut x),
            DVectorView::from(&direction),
            value,
            directional,
        ) {
            Ok(outcome) => outcome,
            Err(error) => {
                debug!("stopping: {}", error);
                break StopReason::LineSearchFailed;
            }
        };
        evaluations += outcome.evaluations;
        iterations += 1;
        let previous_value = value;
        value = outcome.value;
        let step = &direction * outcome.step_length;
        debug!(
            "iteration {}: sum of squares = {:.6e}, step length = {}",
            iterations, value, outcome.step_length
        );

        if step.norm() <= settings.step_tolerance * (1.0 + x.norm()) {
            break StopReason::StepTolerance;
        }
        if previous_value - value <= settings.function_tolerance * (1.0 + value.abs()) {
            break StopReason::FunctionTolerance;
        }
    };

    Ok(SolveOutcome {
        solution: x,
        stop,
        iterations,
        function_evaluations: evaluations,
        final_value: value,
    })
}

/// Solves `(J^T J) d = -J^T r`, or returns `None` when the normal matrix is
/// singular.
fn gauss_newton_direction(jacobian: &DMatrix<f64>, residual: &DVector<f64>) -> Option<DVector<f64>> {
    let normal = Matrix::from(jacobian.transpose() * jacobian);
    let rhs = -(jacobian.transpose() * residual);
    let mut factor = Factor::new();
    factor.factorize(&normal).ok()?;
    factor.solve_vector(&rhs).ok()
}

/// Adapts a residual function to the scalar objective interface, keeping the
/// residual of the most recently evaluated point in its buffer.
struct SumOfSquares<'a, F> {
    function: &'a mut F,
    residual: &'a mut DVector<f64>,
}

impl<F: ResidualFunction> ObjectiveFunction for SumOfSquares<'_, F> {
    fn dimension(&self) -> usize {
        self.function.dimension()
    }

    fn evaluate(&mut self, x: &DVectorView<f64>) -> Result<f64, Box<dyn Error>> {
        self.function
            .evaluate_into(&mut DVectorViewMut::from(&mut *self.residual), x)?;
        Ok(self.residual.norm_squared())
    }
}

/// Central difference Jacobian of the residual vector, one column per
/// parameter, reusing the objective adapter's residual buffer.
fn central_difference_jacobian<F>(
    objective: &mut SumOfSquares<'_, F>,
    x: &mut DVector<f64>,
    evaluations: &mut usize,
) -> Result<DMatrix<f64>, SolverError>
where
    F: ResidualFunction,
{
    let n = x.len();
    let m = objective.function.residual_count();
    let spacing = f64::EPSILON.cbrt();
    let mut jacobian = DMatrix::zeros(m, n);
    let mut forward = DVector::zeros(m);
    for i in 0..n {
        let origin = x[i];
        let h = spacing * origin.abs().max(1.0);
        x[i] = origin + h;
        objective
            .function
            .evaluate_into(&mut DVectorViewMut::from(&mut forward), &DVectorView::from(&*x))
            .map_err(SolverError::Evaluation)?;
        x[i] = origin - h;
        objective
            .function
            .evaluate_into(
                &mut DVectorViewMut::from(&mut *objective.residual),
                &DVectorView::from(&*x),
            )
            .map_err(SolverError::Evaluation)?;
        x[i] = origin;
        *evaluations += 2;
        for row in 0..m {
            jacobian[(row, i)] = (forward[row] - objective.residual[row]) / (2.0 * h);
        }
    }
    // Leave the buffer holding the residual at the unperturbed point.
    objective
        .function
        .evaluate_into(
            &mut DVectorViewMut::from(&mut *objective.residual),
            &DVectorView::from(&*x),
        )
        .map_err(SolverError::Evaluation)?;
    *evaluations += 1;
    Ok(jacobian)
}
