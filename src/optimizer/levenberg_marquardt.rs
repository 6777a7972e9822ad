//! Levenberg-Marquardt optimizer on factor graphs.
//!
//! Each outer iteration linearizes the nonlinear graph once and then tries
//! damping values until a step is accepted:
//!
//! ```text
//! linearize ─► damp(λ) ─► eliminate ─► evaluate ─┬─ accept ─► decrease λ ─► done
//!                ▲                                ├─ reject ─► increase λ ─┐
//!                └────────────────────────────────┼────────────────────────┘
//!                                                 └─ cost change negligible ─► stop
//! ```
//!
//! A trial is scored by its model fidelity
//!
//! ```text
//! ρ = (E(x) − E(x ⊕ δ)) / (E(x) − L(δ))
//! ```
//!
//! where `L` is the cost of the undamped linearization. A step is accepted when
//! `ρ > min_model_fidelity`, or unconditionally when the predicted reduction is
//! below 1e-15 (the model is flat but the true cost still moved). A singular
//! damped system counts as a rejected trial.
//!
//! ## Damping schedule
//!
//! - rejection: `λ ← λ·f`, then `f ← 2f` unless the factor is fixed
//! - acceptance: `λ ← λ·max(1/3, 1 − (2ρ − 1)³)` and `f ← 2`, or `λ ← λ/f` with a fixed factor
//! - λ is floored at `lambda_lower_bound`; reaching `lambda_upper_bound` gives up
//!
//! # Example
//!
//! ```
//! use apex_hessian::core::{NonlinearFactorGraph, Values};
//! use apex_hessian::factors::{BetweenFactor, PriorFactor};
//! use apex_hessian::linear::NoiseModel;
//! use apex_hessian::optimizer::{
//!     LevenbergMarquardtConfig, LevenbergMarquardtOptimizer, NonlinearOptimizer,
//! };
//! use nalgebra::dvector;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = NonlinearFactorGraph::new();
//! graph.add_residual_block(&[0], Box::new(PriorFactor { data: dvector![0.0] }), NoiseModel::unit(1));
//! graph.add_residual_block(&[0, 1], Box::new(BetweenFactor::new(dvector![1.0])), NoiseModel::unit(1));
//!
//! let initial: Values = [(0, dvector![5.0]), (1, dvector![5.0])].into_iter().collect();
//! let config = LevenbergMarquardtConfig::new().with_max_iterations(5);
//! let mut optimizer = LevenbergMarquardtOptimizer::new(graph, initial, config)?;
//! let result = optimizer.optimize()?;
//! assert!(result.final_error < 1e-6);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use tracing::{debug, warn};
use web_time::Instant;

use crate::core::{NonlinearFactorGraph, Values};
use crate::linalg::LinearSolverType;
use crate::linear::{Key, Ordering};
use crate::optimizer::{
    ConvergenceCriteria, DampedSystemBuilder, IterationOutcome, LinearSystemSolver,
    NonlinearOptimizer, OptObserver, OptObserverVec, OptimizerError, OptimizerResult,
    resolve_ordering,
};

/// Predicted reductions at or below this are treated as a flat model.
const MIN_LINEARIZED_COST_CHANGE: f64 = 1e-15;

/// Configuration parameters for the Levenberg-Marquardt optimizer.
///
/// ```
/// use apex_hessian::optimizer::LevenbergMarquardtConfig;
///
/// let config = LevenbergMarquardtConfig::new()
///     .with_lambda_initial(1e-3)
///     .with_lambda_bounds(0.0, 1e8)
///     .with_diagonal_damping(true)
///     .with_max_iterations(50);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtConfig {
    pub lambda_initial: f64,
    /// Initial multiplier applied to λ on a rejected trial
    pub lambda_factor: f64,
    /// Giving up once λ reaches this value
    pub lambda_upper_bound: f64,
    pub lambda_lower_bound: f64,
    /// Keep the multiplier constant instead of doubling it on every rejection
    pub use_fixed_lambda_factor: bool,
    /// Scale the damping by the diagonal of the information matrix
    pub diagonal_damping: bool,
    /// Acceptance threshold on ρ
    pub min_model_fidelity: f64,
    /// Relative cost change below which a trial stops the search (and the outer loop converges)
    pub relative_error_tol: f64,
    pub absolute_error_tol: f64,
    /// Absolute cost below which the optimization stops
    pub error_tol: f64,
    pub max_iterations: usize,
    pub linear_solver_type: LinearSolverType,
    /// Elimination ordering; ascending keys when unset
    pub ordering: Option<Ordering>,
}

impl Default for LevenbergMarquardtConfig {
    fn default() -> Self {
        Self {
            lambda_initial: 1e-5,
            lambda_factor: 10.0,
            lambda_upper_bound: 1e5,
            lambda_lower_bound: 0.0,
            use_fixed_lambda_factor: false,
            diagonal_damping: false,
            min_model_fidelity: 1e-3,
            relative_error_tol: 1e-5,
            absolute_error_tol: 1e-5,
            error_tol: 0.0,
            max_iterations: 100,
            linear_solver_type: LinearSolverType::default(),
            ordering: None,
        }
    }
}

impl LevenbergMarquardtConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lambda_initial(mut self, lambda_initial: f64) -> Self {
        self.lambda_initial = lambda_initial;
        self
    }

    pub fn with_lambda_factor(mut self, lambda_factor: f64) -> Self {
        self.lambda_factor = lambda_factor;
        self
    }

    pub fn with_lambda_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lambda_lower_bound = lower;
        self.lambda_upper_bound = upper;
        self
    }

    pub fn with_fixed_lambda_factor(mut self, use_fixed_lambda_factor: bool) -> Self {
        self.use_fixed_lambda_factor = use_fixed_lambda_factor;
        self
    }

    pub fn with_diagonal_damping(mut self, diagonal_damping: bool) -> Self {
        self.diagonal_damping = diagonal_damping;
        self
    }

    pub fn with_min_model_fidelity(mut self, min_model_fidelity: f64) -> Self {
        self.min_model_fidelity = min_model_fidelity;
        self
    }

    pub fn with_relative_error_tol(mut self, relative_error_tol: f64) -> Self {
        self.relative_error_tol = relative_error_tol;
        self
    }

    pub fn with_absolute_error_tol(mut self, absolute_error_tol: f64) -> Self {
        self.absolute_error_tol = absolute_error_tol;
        self
    }

    pub fn with_error_tol(mut self, error_tol: f64) -> Self {
        self.error_tol = error_tol;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_linear_solver_type(mut self, linear_solver_type: LinearSolverType) -> Self {
        self.linear_solver_type = linear_solver_type;
        self
    }

    pub fn with_ordering(mut self, ordering: Ordering) -> Self {
        self.ordering = Some(ordering);
        self
    }

    pub fn convergence_criteria(&self) -> ConvergenceCriteria {
        ConvergenceCriteria {
            relative_error_tol: self.relative_error_tol,
            absolute_error_tol: self.absolute_error_tol,
            error_tol: self.error_tol,
            max_iterations: self.max_iterations,
        }
    }

    pub fn validate(&self) -> OptimizerResult<()> {
        let invalid = |msg: String| Err(OptimizerError::InvalidParameters(msg).log());
        if !(self.lambda_initial.is_finite() && self.lambda_initial > 0.0) {
            return invalid(format!(
                "lambda_initial must be positive and finite, got {}",
                self.lambda_initial
            ));
        }
        if !(self.lambda_factor.is_finite() && self.lambda_factor > 1.0) {
            return invalid(format!(
                "lambda_factor must be finite and greater than 1, got {}",
                self.lambda_factor
            ));
        }
        if !(self.lambda_lower_bound >= 0.0 && self.lambda_lower_bound < self.lambda_upper_bound) {
            return invalid(format!(
                "lambda bounds must satisfy 0 <= lower < upper, got [{}, {}]",
                self.lambda_lower_bound, self.lambda_upper_bound
            ));
        }
        if !self.min_model_fidelity.is_finite() {
            return invalid("min_model_fidelity must be finite".to_string());
        }
        let tolerances = [
            ("relative_error_tol", self.relative_error_tol),
            ("absolute_error_tol", self.absolute_error_tol),
            ("error_tol", self.error_tol),
        ];
        for (name, value) in tolerances {
            if !(value >= 0.0) {
                return invalid(format!("{name} must be non-negative, got {value}"));
            }
        }
        Ok(())
    }

    /// Print configuration parameters (debug level only)
    pub fn print_configuration(&self) {
        debug!(
            "Configuration:\n  Solver:        Levenberg-Marquardt\n  Linear solver: {}\n  Ordering:      {}\n  Convergence Criteria:\n  Max iterations:      {}\n  Relative error tol:  {:.2e}\n  Absolute error tol:  {:.2e}\n  Error threshold:     {:.2e}\n  Damping Parameters:\n  Initial lambda:      {:.2e}\n  Lambda range:        [{:.2e}, {:.2e}]\n  Lambda factor:       {:.2} ({})\n  Diagonal damping:    {}\n  Min model fidelity:  {:.2e}",
            self.linear_solver_type,
            if self.ordering.is_some() {
                "explicit"
            } else {
                "natural"
            },
            self.max_iterations,
            self.relative_error_tol,
            self.absolute_error_tol,
            self.error_tol,
            self.lambda_initial,
            self.lambda_lower_bound,
            self.lambda_upper_bound,
            self.lambda_factor,
            if self.use_fixed_lambda_factor {
                "fixed"
            } else {
                "growing"
            },
            if self.diagonal_damping {
                "enabled"
            } else {
                "disabled"
            },
            self.min_model_fidelity,
        );
    }
}

/// Mutable state of a Levenberg-Marquardt run.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtState {
    pub values: Values,
    /// Cost at `values`
    pub error: f64,
    pub lambda: f64,
    /// Multiplier applied to λ on the next rejection
    pub current_factor: f64,
    pub iterations: usize,
    pub total_inner_iterations: usize,
}

impl LevenbergMarquardtState {
    pub fn new(values: Values, error: f64, config: &LevenbergMarquardtConfig) -> Self {
        Self {
            values,
            error,
            lambda: config.lambda_initial,
            current_factor: config.lambda_factor,
            iterations: 0,
            total_inner_iterations: 0,
        }
    }

    /// Damping update after a rejected trial.
    pub fn increase_lambda(&mut self, config: &LevenbergMarquardtConfig) {
        self.lambda *= self.current_factor;
        if !config.use_fixed_lambda_factor {
            self.current_factor *= 2.0;
        }
    }

    /// Damping update after an accepted step with fidelity `model_fidelity`.
    pub fn decrease_lambda(&mut self, config: &LevenbergMarquardtConfig, model_fidelity: f64) {
        if config.use_fixed_lambda_factor {
            self.lambda /= self.current_factor;
        } else {
            let c = 2.0 * model_fidelity - 1.0;
            self.lambda *= (1.0_f64 / 3.0).max(1.0 - c * c * c);
            self.current_factor = 2.0;
        }
        self.lambda = self.lambda.max(config.lambda_lower_bound);
    }
}

/// What to do with one trial step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    Accept,
    /// Increase λ and try again
    Reject,
    /// The true cost change is negligible; stop trying larger λ
    StopSearching,
}

/// Scoring of one trial step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepEvaluation {
    /// `E(x) − L(δ)`
    pub linearized_cost_change: f64,
    /// `E(x ⊕ δ)`, evaluated only for a valid step
    pub new_error: Option<f64>,
    /// `E(x) − E(x ⊕ δ)`
    pub cost_change: Option<f64>,
    /// ρ, left at 0 when the model is flat or the step was not evaluated
    pub model_fidelity: f64,
    pub decision: StepDecision,
}

/// Score a trial step.
///
/// `new_error` is the true cost at the retracted estimate and must be given for
/// every step with `linearized_cost_change >= 0`.
pub fn evaluate_step(
    error: f64,
    linearized_cost_change: f64,
    new_error: Option<f64>,
    config: &LevenbergMarquardtConfig,
) -> StepEvaluation {
    let mut evaluation = StepEvaluation {
        linearized_cost_change,
        new_error,
        cost_change: None,
        model_fidelity: 0.0,
        decision: StepDecision::Reject,
    };
    if !(linearized_cost_change >= 0.0) {
        return evaluation;
    }
    let Some(new_error) = new_error.filter(|e| e.is_finite()) else {
        return evaluation;
    };

    let cost_change = error - new_error;
    evaluation.cost_change = Some(cost_change);
    if cost_change.abs() < config.relative_error_tol * error {
        evaluation.decision = StepDecision::StopSearching;
        return evaluation;
    }
    if linearized_cost_change > MIN_LINEARIZED_COST_CHANGE {
        evaluation.model_fidelity = cost_change / linearized_cost_change;
        if evaluation.model_fidelity > config.min_model_fidelity {
            evaluation.decision = StepDecision::Accept;
        }
    } else {
        evaluation.decision = StepDecision::Accept;
    }
    evaluation
}

/// One λ trial, for Ceres-style debug tables.
#[derive(Debug, Clone)]
pub struct TrialStats {
    pub iteration: usize,
    /// Trial index within the iteration
    pub trial: usize,
    pub lambda: f64,
    pub error: f64,
    pub new_error: f64,
    pub linearized_cost_change: f64,
    pub model_fidelity: f64,
    pub delta_norm: f64,
    pub trial_time_ms: f64,
    /// `None` when the damped system was indeterminant
    pub decision: Option<StepDecision>,
}

impl TrialStats {
    /// Print table header in Ceres-style format
    pub fn print_header() {
        debug!(
            "{:>4}  {:>5}  {:>11}  {:>13}  {:>13}  {:>13}  {:>11}  {:>11}  {:>11}  {:>8}",
            "iter",
            "trial",
            "lambda",
            "error",
            "new_error",
            "lin_change",
            "fidelity",
            "|delta|",
            "time",
            "status"
        );
    }

    /// Print single trial line in Ceres-style format with scientific notation
    pub fn print_line(&self) {
        let status = match self.decision {
            Some(StepDecision::Accept) => "✓",
            Some(StepDecision::Reject) => "✗",
            Some(StepDecision::StopSearching) => "stop",
            None => "singular",
        };
        debug!(
            "{:>4}  {:>5}  {:>11.2e}  {:>13.6e}  {:>13.6e}  {:>13.2e}  {:>11.2e}  {:>11.2e}  {:>9.2}ms  {:>8}",
            self.iteration,
            self.trial,
            self.lambda,
            self.error,
            self.new_error,
            self.linearized_cost_change,
            self.model_fidelity,
            self.delta_norm,
            self.trial_time_ms,
            status
        );
    }
}

/// Levenberg-Marquardt optimizer over a [`NonlinearFactorGraph`].
pub struct LevenbergMarquardtOptimizer {
    graph: NonlinearFactorGraph,
    config: LevenbergMarquardtConfig,
    state: LevenbergMarquardtState,
    ordering: Ordering,
    dims: BTreeMap<Key, usize>,
    damping: DampedSystemBuilder,
    linear_solver: LinearSystemSolver,
    observers: OptObserverVec,
}

impl LevenbergMarquardtOptimizer {
    pub fn new(
        graph: NonlinearFactorGraph,
        initial: Values,
        config: LevenbergMarquardtConfig,
    ) -> OptimizerResult<Self> {
        config.validate()?;
        if graph.is_empty() {
            return Err(OptimizerError::EmptyProblem.log());
        }
        let error = graph.error(&initial)?;
        let ordering = resolve_ordering(config.ordering.as_ref(), &initial);
        let dims = initial.dims();
        if tracing::enabled!(tracing::Level::DEBUG) {
            config.print_configuration();
            debug!("initial error: {error:.6e}");
            TrialStats::print_header();
        }
        Ok(Self {
            graph,
            state: LevenbergMarquardtState::new(initial, error, &config),
            linear_solver: LinearSystemSolver::new(config.linear_solver_type),
            config,
            ordering,
            dims,
            damping: DampedSystemBuilder::new(),
            observers: OptObserverVec::new(),
        })
    }

    /// Add an observer notified after every outer iteration.
    pub fn add_observer(&mut self, observer: impl OptObserver + 'static) {
        self.observers.add(observer);
    }

    pub fn state(&self) -> &LevenbergMarquardtState {
        &self.state
    }

    pub fn config(&self) -> &LevenbergMarquardtConfig {
        &self.config
    }

    pub fn graph(&self) -> &NonlinearFactorGraph {
        &self.graph
    }
}

impl NonlinearOptimizer for LevenbergMarquardtOptimizer {
    fn iterate(&mut self) -> OptimizerResult<IterationOutcome> {
        let linear = self.graph.linearize(&self.state.values)?;
        self.damping.invalidate();
        let collect_stats = tracing::enabled!(tracing::Level::DEBUG);

        let mut trial = 0;
        let mut last_delta_norm = 0.0;
        let mut last_fidelity = 0.0;
        let outcome = loop {
            let trial_start = Instant::now();
            let lambda = self.state.lambda;
            debug!("trying lambda = {lambda:.6e}");
            let damped = self.damping.build(
                &linear,
                &self.dims,
                lambda,
                self.config.diagonal_damping,
            )?;
            self.state.total_inner_iterations += 1;

            let solved = match self.linear_solver.solve(&damped, &self.ordering) {
                Ok(delta) => Some(delta),
                Err(e) if e.is_indeterminant() => {
                    debug!("damped system at lambda {lambda:.6e} not solvable: {e}");
                    None
                }
                Err(e) => return Err(e.into()),
            };

            let mut evaluation = None;
            let mut candidate = None;
            let mut delta_norm = f64::NAN;
            if let Some(delta) = solved {
                delta_norm = delta.norm();
                debug!("linear delta norm = {delta_norm:.6e}");
                let linearized_cost_change = self.state.error - linear.error(&delta)?;
                let new_error = if linearized_cost_change >= 0.0 {
                    let values = self.state.values.retract(&delta)?;
                    let new_error = self.graph.error(&values)?;
                    candidate = Some(values);
                    Some(new_error)
                } else {
                    None
                };
                evaluation = Some(evaluate_step(
                    self.state.error,
                    linearized_cost_change,
                    new_error,
                    &self.config,
                ));
            }
            let decision = evaluation.map_or(StepDecision::Reject, |e| e.decision);
            last_delta_norm = delta_norm;
            last_fidelity = evaluation.map_or(0.0, |e| e.model_fidelity);

            if collect_stats {
                TrialStats {
                    iteration: self.state.iterations,
                    trial,
                    lambda,
                    error: self.state.error,
                    new_error: evaluation.and_then(|e| e.new_error).unwrap_or(f64::NAN),
                    linearized_cost_change: evaluation
                        .map_or(f64::NAN, |e| e.linearized_cost_change),
                    model_fidelity: last_fidelity,
                    delta_norm,
                    trial_time_ms: trial_start.elapsed().as_secs_f64() * 1000.0,
                    decision: evaluation.map(|e| e.decision),
                }
                .print_line();
            }
            trial += 1;

            if decision == StepDecision::Accept
                && let (Some(values), Some(new_error)) =
                    (candidate, evaluation.and_then(|e| e.new_error))
            {
                self.state.values = values;
                self.state.error = new_error;
                self.state.decrease_lambda(&self.config, last_fidelity);
                self.damping.invalidate();
                break IterationOutcome::Accepted;
            }
            if decision == StepDecision::StopSearching {
                debug!("cost change below relative tolerance, stop searching lambda");
                break IterationOutcome::StoppedSearching;
            }

            debug!(
                "increasing lambda: error {:.6e}, new error {:.6e}",
                self.state.error,
                evaluation.and_then(|e| e.new_error).unwrap_or(f64::NAN)
            );
            self.state.increase_lambda(&self.config);
            if self.state.lambda >= self.config.lambda_upper_bound {
                warn!(
                    "Levenberg-Marquardt giving up because cannot decrease error with maximum lambda ({:.2e})",
                    self.state.lambda
                );
                break IterationOutcome::GaveUp;
            }
        };

        self.linear_solver.flush_diagnostics();
        self.state.iterations += 1;
        self.observers.set_iteration_metrics(
            self.state.error,
            Some(self.state.lambda),
            last_delta_norm,
            Some(last_fidelity),
        );
        self.observers
            .notify(&self.state.values, self.state.iterations - 1);
        Ok(outcome)
    }

    fn values(&self) -> &Values {
        &self.state.values
    }

    fn error(&self) -> f64 {
        self.state.error
    }

    fn iterations(&self) -> usize {
        self.state.iterations
    }

    fn inner_iterations(&self) -> usize {
        self.state.total_inner_iterations
    }

    fn lambda(&self) -> Option<f64> {
        Some(self.state.lambda)
    }

    fn convergence_criteria(&self) -> ConvergenceCriteria {
        self.config.convergence_criteria()
    }
}
