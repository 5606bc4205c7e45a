//! Numerical minimisation routines driven through callback traits.
//!
//! The routines know nothing about fields: they see a flat parameter vector
//! and a scalar objective or residual vector through the [`ObjectiveFunction`]
//! and [`ResidualFunction`] traits, and report how they stopped rather than
//! treating every non-converged outcome as an error.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Gauss-Newton iteration for sum-of-squares objectives
pub mod least_squares;
/// Backtracking line search shared by the iterative solvers
pub mod line_search;
/// BFGS iteration with finite difference gradients
pub mod quasi_newton;

pub use least_squares::{least_squares_quasi_newton, ResidualFunction};
pub use line_search::{BacktrackingLineSearch, LineSearch, LineSearchOutcome};
pub use quasi_newton::{quasi_newton, ObjectiveFunction};

/// Tolerances and limits shared by the iterative solvers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    /// Relative decrease of the objective below which iteration stops.
    pub function_tolerance: f64,
    /// Relative gradient norm below which iteration stops.
    pub gradient_tolerance: f64,
    /// Relative step norm below which iteration stops.
    pub step_tolerance: f64,
    pub maximum_iterations: usize,
    pub maximum_function_evaluations: usize,
    /// Largest permitted step norm; longer steps are scaled down.
    pub maximum_step: f64,
    /// Smallest permitted step norm before a line search gives up.
    pub minimum_step: f64,
    /// Sufficient-decrease constant of the Armijo condition.
    pub line_search_tolerance: f64,
    pub maximum_backtrack_iterations: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            function_tolerance: 1.49012e-8,
            gradient_tolerance: 6.05545e-6,
            step_tolerance: 1.49012e-8,
            maximum_iterations: 100,
            maximum_function_evaluations: 1000,
            maximum_step: 1.0e3,
            minimum_step: 1.49012e-8,
            line_search_tolerance: 1.0e-4,
            maximum_backtrack_iterations: 5,
        }
    }
}

/// Why a solver stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    StepTolerance,
    FunctionTolerance,
    GradientTolerance,
    IterationLimit,
    EvaluationLimit,
    /// No acceptable step was found; the best point so far is kept.
    LineSearchFailed,
}

impl StopReason {
    /// Numeric return code reported in solution reports. Converged stops are
    /// positive and numbered by which tolerance test passed first.
    pub fn code(&self) -> i32 {
        match self {
            StopReason::StepTolerance => 1,
            StopReason::FunctionTolerance => 2,
            StopReason::GradientTolerance => 3,
            StopReason::IterationLimit => 4,
            StopReason::EvaluationLimit => 5,
            StopReason::LineSearchFailed => -1,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StopReason::StepTolerance => "step tolerance reached",
            StopReason::FunctionTolerance => "function tolerance reached",
            StopReason::GradientTolerance => "gradient tolerance reached",
            StopReason::IterationLimit => "iteration limit reached",
            StopReason::EvaluationLimit => "function evaluation limit reached",
            StopReason::LineSearchFailed => "line search failed to find an acceptable step",
        }
    }

    /// Whether the stop corresponds to a passed tolerance test.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            StopReason::StepTolerance | StopReason::FunctionTolerance | StopReason::GradientTolerance
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Final state of a solver run. The solution holds the best point found even
/// when the stop reason is not a convergence test.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub solution: DVector<f64>,
    pub stop: StopReason,
    pub iterations: usize,
    pub function_evaluations: usize,
    pub final_value: f64,
}

/// A solver could not start or lost the ability to evaluate its callbacks.
#[derive(Debug)]
pub enum SolverError {
    /// The starting point has no parameters to vary.
    EmptyProblem,
    DimensionMismatch {
        expected: usize,
        found: usize,
    },
    /// A callback evaluation failed outside a line search trial.
    Evaluation(Box<dyn Error>),
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SolverError::EmptyProblem => write!(f, "there are no parameters to optimise"),
            SolverError::DimensionMismatch { expected, found } => write!(
                f,
                "the function expects {} parameter(s), the starting point has {}",
                expected, found
            ),
            SolverError::Evaluation(error) => {
                write!(f, "failed to evaluate the objective: {}", error)
            }
        }
    }
}

impl Error for SolverError {}
