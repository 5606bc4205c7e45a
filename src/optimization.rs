//! The optimisation problem: dependent fields, objective fields, field
//! assignments and the solver configuration, with one `optimize` entry point
//! dispatching to the configured method.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

use crate::fields::{Field, FieldAssignment, FieldError, Region};
use crate::solvers::{
    least_squares_quasi_newton, quasi_newton, SolveOutcome, SolverError, SolverSettings, StopReason,
};

/// Degree-of-freedom collection from dependent and conditional fields
pub mod dof;

pub(crate) mod newton;
pub(crate) mod objective;

pub use dof::{Dof, DofCollection};

/// The numerical method used to minimise the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Method {
    /// Derivative-free BFGS iteration on the scalar objective.
    #[default]
    QuasiNewton,
    /// Gauss-Newton iteration on the objective's residual terms.
    LeastSquaresQuasiNewton,
    /// One assembled Newton step using analytic field derivatives.
    Newton,
}

/// Real-valued solver attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RealAttribute {
    FunctionTolerance,
    GradientTolerance,
    StepTolerance,
    MaximumStep,
    MinimumStep,
    LinesearchTolerance,
    /// Reserved for a trust region strategy; not used by the current
    /// methods.
    TrustRegionSize,
}

/// Integer-valued solver attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntegerAttribute {
    MaximumIterations,
    MaximumFunctionEvaluations,
    MaximumBacktrackIterations,
}

#[derive(Debug)]
pub enum OptimizationError {
    /// A field or region belongs to a different region than the problem.
    WrongRegion,
    Field(FieldError),
    /// The field is already in the list it was added to.
    DuplicateField,
    /// The field is not in the list it was expected in.
    MissingField,
    NoDependentFields,
    NoObjectiveFields,
    InvalidArgument(&'static str),
    InvalidAttributeValue(&'static str),
    /// The configured solver failed; details are in the solution report.
    SolveFailed(String),
}

impl fmt::Display for OptimizationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OptimizationError::WrongRegion => {
                write!(f, "the field belongs to a different region than this problem")
            }
            OptimizationError::Field(error) => write!(f, "{}", error),
            OptimizationError::DuplicateField => write!(f, "the field is already in the list"),
            OptimizationError::MissingField => write!(f, "the field is not in the list"),
            OptimizationError::NoDependentFields => {
                write!(f, "at least one dependent field is required")
            }
            OptimizationError::NoObjectiveFields => {
                write!(f, "at least one objective field is required")
            }
            OptimizationError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            OptimizationError::InvalidAttributeValue(what) => {
                write!(f, "invalid attribute value: {}", what)
            }
            OptimizationError::SolveFailed(message) => write!(f, "optimisation failed: {}", message),
        }
    }
}

impl Error for OptimizationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OptimizationError::Field(error) => Some(error),
            _ => None,
        }
    }
}

impl From<FieldError> for OptimizationError {
    fn from(error: FieldError) -> Self {
        OptimizationError::Field(error)
    }
}

#[derive(Debug, Clone)]
struct DependentField {
    field: Field,
    conditional: Option<Field>,
}

/// A declarative optimisation problem over one region's fields.
///
/// Dependent fields supply the degrees of freedom, objective fields the
/// quantity to minimise, and field assignments keep derived fields
/// consistent at every trial point. Solving mutates the region's field
/// storage in place and leaves the final parameters applied.
#[derive(Debug)]
pub struct Optimization {
    region_id: u64,
    method: Method,
    dependent_fields: Vec<DependentField>,
    objective_fields: Vec<Field>,
    assignments: Vec<FieldAssignment>,
    settings: SolverSettings,
    trust_region_size: f64,
    report: String,
}

impl Optimization {
    /// Creates a problem bound to a region. Fields added later must belong
    /// to the same region.
    pub fn new(region: &Region) -> Self {
        Self {
            region_id: region.id(),
            method: Method::default(),
            dependent_fields: Vec::new(),
            objective_fields: Vec::new(),
            assignments: Vec::new(),
            settings: SolverSettings::default(),
            trust_region_size: 0.1,
            report: String::new(),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Appends a field whose parameters the solver may vary. Dependent
    /// fields must be finite element or constant fields of the problem's
    /// region.
    pub fn add_dependent_field(
        &mut self,
        region: &Region,
        field: Field,
    ) -> Result<(), OptimizationError> {
        self.check_region(region)?;
        region.field_component_count(field)?;
        if !region.is_finite_element_field(field) && !region.is_constant_field(field) {
            return Err(OptimizationError::InvalidArgument(
                "dependent fields must be finite element or constant fields",
            ));
        }
        if self.dependent_fields.iter().any(|entry| entry.field == field) {
            return Err(OptimizationError::DuplicateField);
        }
        self.dependent_fields.push(DependentField {
            field,
            conditional: None,
        });
        Ok(())
    }

    pub fn remove_dependent_field(&mut self, field: Field) -> Result<(), OptimizationError> {
        let position = self
            .dependent_fields
            .iter()
            .position(|entry| entry.field == field)
            .ok_or(OptimizationError::MissingField)?;
        self.dependent_fields.remove(position);
        Ok(())
    }

    /// Dependent fields in the order they were added.
    pub fn dependent_fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.dependent_fields.iter().map(|entry| entry.field)
    }

    pub fn conditional_field(&self, dependent: Field) -> Option<Field> {
        self.dependent_fields
            .iter()
            .find(|entry| entry.field == dependent)
            .and_then(|entry| entry.conditional)
    }

    /// Sets or clears the conditional field masking a dependent field's
    /// degrees of freedom. The conditional must be scalar or match the
    /// dependent field's component count.
    pub fn set_conditional_field(
        &mut self,
        region: &Region,
        dependent: Field,
        conditional: Option<Field>,
    ) -> Result<(), OptimizationError> {
        self.check_region(region)?;
        if let Some(field) = conditional {
            let components = region.field_component_count(field)?;
            let dependent_components = region.field_component_count(dependent)?;
            if components != 1 && components != dependent_components {
                return Err(OptimizationError::Field(FieldError::ComponentMismatch {
                    expected: dependent_components,
                    found: components,
                }));
            }
        }
        let entry = self
            .dependent_fields
            .iter_mut()
            .find(|entry| entry.field == dependent)
            .ok_or(OptimizationError::MissingField)?;
        entry.conditional = conditional;
        Ok(())
    }

    #[deprecated(note = "dependent field is the current name; use add_dependent_field")]
    pub fn add_independent_field(
        &mut self,
        region: &Region,
        field: Field,
    ) -> Result<(), OptimizationError> {
        self.add_dependent_field(region, field)
    }

    #[deprecated(note = "dependent field is the current name; use remove_dependent_field")]
    pub fn remove_independent_field(&mut self, field: Field) -> Result<(), OptimizationError> {
        self.remove_dependent_field(field)
    }

    /// Appends a real-valued field whose component sum joins the objective.
    pub fn add_objective_field(
        &mut self,
        region: &Region,
        field: Field,
    ) -> Result<(), OptimizationError> {
        self.check_region(region)?;
        region.field_component_count(field)?;
        if self.objective_fields.contains(&field) {
            return Err(OptimizationError::DuplicateField);
        }
        self.objective_fields.push(field);
        Ok(())
    }

    pub fn remove_objective_field(&mut self, field: Field) -> Result<(), OptimizationError> {
        let position = self
            .objective_fields
            .iter()
            .position(|entry| *entry == field)
            .ok_or(OptimizationError::MissingField)?;
        self.objective_fields.remove(position);
        Ok(())
    }

    /// Objective fields in the order they were added.
    pub fn objective_fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.objective_fields.iter().copied()
    }

    /// Appends a field assignment applied, in order, after every write of
    /// trial parameters and once more after the solver finishes.
    pub fn add_field_assignment(&mut self, assignment: FieldAssignment) {
        self.assignments.push(assignment);
    }

    pub fn real_attribute(&self, attribute: RealAttribute) -> f64 {
        match attribute {
            RealAttribute::FunctionTolerance => self.settings.function_tolerance,
            RealAttribute::GradientTolerance => self.settings.gradient_tolerance,
            RealAttribute::StepTolerance => self.settings.step_tolerance,
            RealAttribute::MaximumStep => self.settings.maximum_step,
            RealAttribute::MinimumStep => self.settings.minimum_step,
            RealAttribute::LinesearchTolerance => self.settings.line_search_tolerance,
            RealAttribute::TrustRegionSize => self.trust_region_size,
        }
    }

    pub fn set_real_attribute(
        &mut self,
        attribute: RealAttribute,
        value: f64,
    ) -> Result<(), OptimizationError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(OptimizationError::InvalidAttributeValue(
                "real attributes must be finite and positive",
            ));
        }
        match attribute {
            RealAttribute::FunctionTolerance => self.settings.function_tolerance = value,
            RealAttribute::GradientTolerance => self.settings.gradient_tolerance = value,
            RealAttribute::StepTolerance => self.settings.step_tolerance = value,
            RealAttribute::MaximumStep => self.settings.maximum_step = value,
            RealAttribute::MinimumStep => self.settings.minimum_step = value,
            RealAttribute::LinesearchTolerance => self.settings.line_search_tolerance = value,
            RealAttribute::TrustRegionSize => self.trust_region_size = value,
        }
        Ok(())
    }

    pub fn integer_attribute(&self, attribute: IntegerAttribute) -> i32 {
        let value = match attribute {
            IntegerAttribute::MaximumIterations => self.settings.maximum_iterations,
            IntegerAttribute::MaximumFunctionEvaluations => {
                self.settings.maximum_function_evaluations
            }
            IntegerAttribute::MaximumBacktrackIterations => {
                self.settings.maximum_backtrack_iterations
            }
        };
        value as i32
    }

    pub fn set_integer_attribute(
        &mut self,
        attribute: IntegerAttribute,
        value: i32,
    ) -> Result<(), OptimizationError> {
        if value < 0 {
            return Err(OptimizationError::InvalidAttributeValue(
                "integer attributes must be non-negative",
            ));
        }
        let value = value as usize;
        match attribute {
            IntegerAttribute::MaximumIterations => self.settings.maximum_iterations = value,
            IntegerAttribute::MaximumFunctionEvaluations => {
                self.settings.maximum_function_evaluations = value
            }
            IntegerAttribute::MaximumBacktrackIterations => {
                self.settings.maximum_backtrack_iterations = value
            }
        }
        Ok(())
    }

    /// The textual report left by the most recent [`optimize`] call,
    /// empty before the first call.
    ///
    /// [`optimize`]: Optimization::optimize
    pub fn solution_report(&self) -> &str {
        &self.report
    }

    /// Runs the configured method and leaves the optimised parameters
    /// applied to the region's fields.
    ///
    /// The whole run sits inside one change bracket, so downstream change
    /// consumers observe a single coalesced event instead of one per trial
    /// evaluation. A solution report is stored whether or not the run
    /// succeeds.
    pub fn optimize(&mut self, region: &mut Region) -> Result<(), OptimizationError> {
        if region.id() != self.region_id {
            return Err(OptimizationError::WrongRegion);
        }
        if self.dependent_fields.is_empty() {
            return Err(OptimizationError::NoDependentFields);
        }
        if self.objective_fields.is_empty() {
            return Err(OptimizationError::NoObjectiveFields);
        }
        self.report.clear();
        region.begin_change();
        let result = self.run_method(region);
        region.end_change();
        result
    }

    fn run_method(&mut self, region: &mut Region) -> Result<(), OptimizationError> {
        match self.method {
            Method::QuasiNewton => self.run_quasi_newton(region),
            Method::LeastSquaresQuasiNewton => self.run_least_squares(region),
            Method::Newton => self.run_newton(region),
        }
    }

    fn run_quasi_newton(&mut self, region: &mut Region) -> Result<(), OptimizationError> {
        let pairs = self.dependent_pairs();
        let dofs = dof::collect(region, &pairs)?;
        let x0 = dofs.initial_values();
        let settings = self.settings;
        let solved = {
            let mut objective = objective::ScalarObjective::new(
                region,
                &dofs,
                &self.assignments,
                &self.objective_fields,
            );
            quasi_newton(&mut objective, x0, &settings)
        };
        match solved {
            Ok(outcome) => self.finish_iterative(region, &dofs, &outcome),
            Err(error) => self.fail_iterative(error),
        }
    }

    fn run_least_squares(&mut self, region: &mut Region) -> Result<(), OptimizationError> {
        let pairs = self.dependent_pairs();
        let dofs = dof::collect(region, &pairs)?;
        let x0 = dofs.initial_values();
        let settings = self.settings;
        let solved = {
            let mut objective = match objective::TermsObjective::prepare(
                region,
                &dofs,
                &self.assignments,
                &self.objective_fields,
            ) {
                Ok(objective) => objective,
                Err(error) => return Err(OptimizationError::Field(error)),
            };
            least_squares_quasi_newton(&mut objective, x0, &settings)
        };
        match solved {
            Ok(outcome) => self.finish_iterative(region, &dofs, &outcome),
            Err(error) => self.fail_iterative(error),
        }
    }

    fn run_newton(&mut self, region: &mut Region) -> Result<(), OptimizationError> {
        if self.dependent_fields.len() != 1 {
            return Err(OptimizationError::InvalidArgument(
                "the Newton method requires exactly one dependent field",
            ));
        }
        let entry = &self.dependent_fields[0];
        if entry.conditional.is_some() {
            log::debug!("the Newton method does not apply conditional fields");
        }
        let dependent = entry.field;
        let stepped = newton::newton_step(region, dependent, &self.objective_fields);
        match stepped {
            Ok(outcome) => {
                objective::run_assignments(region, &self.assignments);
                let mut report = String::new();
                report.push_str(&format!(
                    "Dimension of the problem  = {}\n",
                    outcome.dimension
                ));
                report.push_str(&format!(
                    "No. elements assembled    = {}\n",
                    outcome.elements
                ));
                for parameter in &outcome.unused {
                    report.push_str(&format!("Unused parameter fixed: {}\n", parameter));
                }
                report.push_str("One Newton step applied\n");
                self.report = report;
                Ok(())
            }
            Err(error) => {
                self.report = format!("Optimisation failed: {}\n", error);
                Err(error)
            }
        }
    }

    fn dependent_pairs(&self) -> Vec<(Field, Option<Field>)> {
        self.dependent_fields
            .iter()
            .map(|entry| (entry.field, entry.conditional))
            .collect()
    }

    /// Applies the solver's final point, marks dependent fields changed,
    /// runs the field assignments once more and stores the report.
    fn finish_iterative(
        &mut self,
        region: &mut Region,
        dofs: &DofCollection,
        outcome: &SolveOutcome,
    ) -> Result<(), OptimizationError> {
        dofs.write_values(region, outcome.solution.as_slice())?;
        for entry in &self.dependent_fields {
            region.mark_field_changed(entry.field);
        }
        objective::run_assignments(region, &self.assignments);
        self.report = format!(
            "Dimension of the problem  = {}\n\
             Return code               = {} ({})\n\
             No. iterations taken      = {}\n\
             No. function evaluations  = {}\n\
             Final objective value     = {:e}\n",
            dofs.len(),
            outcome.stop.code(),
            outcome.stop.description(),
            outcome.iterations,
            outcome.function_evaluations,
            outcome.final_value,
        );
        if outcome.stop == StopReason::LineSearchFailed {
            Err(OptimizationError::SolveFailed(
                outcome.stop.description().to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn fail_iterative(&mut self, error: SolverError) -> Result<(), OptimizationError> {
        self.report = format!("Optimisation failed: {}\n", error);
        Err(OptimizationError::SolveFailed(error.to_string()))
    }

    fn check_region(&self, region: &Region) -> Result<(), OptimizationError> {
        if region.id() == self.region_id {
            Ok(())
        } else {
            Err(OptimizationError::WrongRegion)
        }
    }
}
