use log::debug;
use nalgebra::{DVectorView, DVectorViewMut};
use std::error::Error;

use super::quasi_newton::ObjectiveFunction;

/// An accepted line search step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSearchOutcome {
    pub step_length: f64,
    /// Objective value at the accepted point.
    pub value: f64,
    /// Objective evaluations spent, for the caller's evaluation budget.
    pub evaluations: usize,
}

pub trait LineSearch<F: ObjectiveFunction> {
    /// Moves `x` along `direction` to an acceptable point and returns the
    /// step taken. On failure `x` is restored to its starting value.
    fn step(
        &mut self,
        function: &mut F,
        x: DVectorViewMut<f64>,
        direction: DVectorView<f64>,
        value: f64,
        directional_derivative: f64,
    ) -> Result<LineSearchOutcome, Box<dyn Error>>;
}

/// Backtracking line search using the Armijo sufficient decrease condition,
/// halving the step until it passes.
///
/// See Nocedal & Wright (2006), Numerical Optimization, Chapter 3.1.
///
/// A trial point where the objective cannot be evaluated is treated as an
/// unacceptable step rather than an error, so the search backs away from it.
#[derive(Debug, Clone)]
pub struct BacktrackingLineSearch {
    /// The Armijo constant c in (0, 1).
    pub sufficient_decrease: f64,
    /// Smallest step norm to try before giving up.
    pub minimum_step: f64,
    pub max_backtracks: usize,
}

impl BacktrackingLineSearch {
    pub fn new(settings: &super::SolverSettings) -> Self {
        Self {
            sufficient_decrease: settings.line_search_tolerance,
            minimum_step: settings.minimum_step,
            max_backtracks: settings.maximum_backtrack_iterations,
        }
    }
}

impl<F: ObjectiveFunction> LineSearch<F> for BacktrackingLineSearch {
    fn step(
        &mut self,
        function: &mut F,
        mut x: DVectorViewMut<f64>,
        direction: DVectorView<f64>,
        value: f64,
        directional_derivative: f64,
    ) -> Result<LineSearchOutcome, Box<dyn Error>> {
        let direction_norm = direction.norm();
        let mut alpha = 1.0;
        // x is advanced by the difference between successive alphas instead
        // of being rebuilt from the starting point each trial.
        let mut applied = 0.0;
        let mut evaluations = 0;
        for _ in 0..=self.max_backtracks {
            x.axpy(alpha - applied, &direction, 1.0);
            applied = alpha;
            evaluations += 1;
            let trial = match function.evaluate(&DVectorView::from(&x)) {
                Ok(trial) => trial,
                Err(error) => {
                    debug!("rejecting trial step {}: {}", alpha, error);
                    f64::INFINITY
                }
            };
            if trial <= value + self.sufficient_decrease * alpha * directional_derivative {
                return Ok(LineSearchOutcome {
                    step_length: alpha,
                    value: trial,
                    evaluations,
                });
            }
            if alpha * direction_norm <= self.minimum_step {
                break;
            }
            alpha *= 0.5;
        }
        x.axpy(-applied, &direction, 1.0);
        Err(Box::from(format!(
            "no acceptable step within {} backtracks",
            self.max_backtracks
        )))
    }
}
