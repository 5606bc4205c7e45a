use log::debug;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use std::error::Error;

use super::line_search::{BacktrackingLineSearch, LineSearch};
use super::{SolveOutcome, SolverError, SolverSettings, StopReason};

/// A scalar objective over a flat parameter vector.
pub trait ObjectiveFunction {
    fn dimension(&self) -> usize;
    fn evaluate(&mut self, x: &DVectorView<f64>) -> Result<f64, Box<dyn Error>>;
}

impl<X: ObjectiveFunction> ObjectiveFunction for &mut X {
    fn dimension(&self) -> usize {
        X::dimension(self)
    }

    fn evaluate(&mut self, x: &DVectorView<f64>) -> Result<f64, Box<dyn Error>> {
        X::evaluate(self, x)
    }
}

/// Minimises a scalar objective with a BFGS quasi-Newton iteration.
///
/// Gradients are estimated with central differences, so the objective is
/// treated as a black box. The inverse Hessian approximation starts at the
/// identity, is updated with the BFGS formula whenever the curvature along
/// the step allows it, and is reset whenever it stops producing descent
/// directions.
///
/// Tolerance tests are applied in step, function, gradient order; the first
/// to pass determines the reported stop reason. A failed line search stops
/// iteration without discarding the best point found.
pub fn quasi_newton<F>(
    mut function: F,
    x0: DVector<f64>,
    settings: &SolverSettings,
) -> Result<SolveOutcome, SolverError>
where
    F: ObjectiveFunction,
{
    let n = x0.len();
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
    let mut value = function
        .evaluate(&DVectorView::from(&x))
        .map_err(SolverError::Evaluation)?;
    evaluations += 1;
    let mut gradient = central_difference_gradient(&mut function, &mut x, &mut evaluations)?;
    let mut inverse_hessian = DMatrix::identity(n, n);
    let mut line_search = BacktrackingLineSearch::new(settings);
    let mut iterations = 0usize;

    let stop = loop {
        if gradient.norm() <= settings.gradient_tolerance * (1.0 + value.abs()) {
            break StopReason::GradientTolerance;
        }
        if iterations >= settings.maximum_iterations {
            break StopReason::IterationLimit;
        }
        if evaluations >= settings.maximum_function_evaluations {
            break StopReason::EvaluationLimit;
        }

        let mut direction = -(&inverse_hessian * &gradient);
        let mut directional = direction.dot(&gradient);
        if directional >= 0.0 {
            debug!("inverse Hessian lost descent property, resetting to identity");
            inverse_hessian = DMatrix::identity(n, n);
            direction = -gradient.clone();
            directional = -gradient.norm_squared();
        }
        let direction_norm = direction.norm();
        if direction_norm > settings.maximum_step {
            direction *= settings.maximum_step / direction_norm;
            directional = direction.dot(&gradient);
        }

        let outcome = match line_search.step(
            &mut function,
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
            "iteration {}: f = {:.6e}, step length = {}",
            iterations, value, outcome.step_length
        );

        let new_gradient = central_difference_gradient(&mut function, &mut x, &mut evaluations)?;
        let y = &new_gradient - &gradient;
        gradient = new_gradient;
        update_inverse_hessian(&mut inverse_hessian, &step, &y);

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

/// BFGS update of the inverse Hessian approximation,
/// `H' = H - rho (H y s^T + s (H y)^T) + (rho^2 y^T H y + rho) s s^T`
/// with `rho = 1 / (s^T y)`. Steps without sufficient positive curvature
/// leave the approximation unchanged.
fn update_inverse_hessian(h: &mut DMatrix<f64>, s: &DVector<f64>, y: &DVector<f64>) {
    let sy = s.dot(y);
    if sy <= 1e-10 * s.norm() * y.norm() {
        debug!("skipping inverse Hessian update, curvature s.y = {:.3e}", sy);
        return;
    }
    let rho = 1.0 / sy;
    let hy = &*h * y;
    let coefficient = rho * rho * y.dot(&hy) + rho;
    *h -= rho * (&hy * s.transpose() + s * hy.transpose());
    *h += coefficient * (s * s.transpose());
}

/// Central difference gradient with per-component spacing
/// `cbrt(eps) * max(1, |x_i|)`.
fn central_difference_gradient<F>(
    function: &mut F,
    x: &mut DVector<f64>,
    evaluations: &mut usize,
) -> Result<DVector<f64>, SolverError>
where
    F: ObjectiveFunction,
{
    let n = x.len();
    let spacing = f64::EPSILON.cbrt();
    let mut gradient = DVector::zeros(n);
    for i in 0..n {
        let origin = x[i];
        let h = spacing * origin.abs().max(1.0);
        x[i] = origin + h;
        let forward = function
            .evaluate(&DVectorView::from(&*x))
            .map_err(SolverError::Evaluation)?;
        x[i] = origin - h;
        let backward = function
            .evaluate(&DVectorView::from(&*x))
            .map_err(SolverError::Evaluation)?;
        x[i] = origin;
        *evaluations += 2;
        gradient[i] = (forward - backward) / (2.0 * h);
    }
    Ok(gradient)
}
