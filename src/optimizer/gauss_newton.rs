//! Gauss-Newton optimization on factor graphs.
//!
//! Every iteration takes the full step of the undamped linearization:
//!
//! ```text
//! G·δ = g,   x ← x ⊕ δ
//! ```
//!
//! There is no step control, so a singular information matrix is fatal and a
//! step that increases the cost is still taken. Use
//! [`LevenbergMarquardtOptimizer`](crate::optimizer::LevenbergMarquardtOptimizer)
//! when the initial estimate is far from the optimum or some variables are
//! weakly constrained.

use tracing::debug;
use web_time::Instant;

use crate::core::{NonlinearFactorGraph, Values};
use crate::linalg::LinearSolverType;
use crate::linear::Ordering;
use crate::optimizer::{
    ConvergenceCriteria, IterationOutcome, LinearSystemSolver, NonlinearOptimizer, OptObserver,
    OptObserverVec, OptimizerError, OptimizerResult, resolve_ordering,
};

/// Configuration parameters for the Gauss-Newton optimizer.
#[derive(Debug, Clone)]
pub struct GaussNewtonConfig {
    pub relative_error_tol: f64,
    pub absolute_error_tol: f64,
    pub error_tol: f64,
    pub max_iterations: usize,
    pub linear_solver_type: LinearSolverType,
    /// Elimination ordering; ascending keys when unset
    pub ordering: Option<Ordering>,
}

impl Default for GaussNewtonConfig {
    fn default() -> Self {
        let criteria = ConvergenceCriteria::default();
        Self {
            relative_error_tol: criteria.relative_error_tol,
            absolute_error_tol: criteria.absolute_error_tol,
            error_tol: criteria.error_tol,
            max_iterations: criteria.max_iterations,
            linear_solver_type: LinearSolverType::default(),
            ordering: None,
        }
    }
}

impl GaussNewtonConfig {
    pub fn new() -> Self {
        Self::default()
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
        let tolerances = [
            ("relative_error_tol", self.relative_error_tol),
            ("absolute_error_tol", self.absolute_error_tol),
            ("error_tol", self.error_tol),
        ];
        for (name, value) in tolerances {
            if !(value >= 0.0) {
                return Err(OptimizerError::InvalidParameters(format!(
                    "{name} must be non-negative, got {value}"
                ))
                .log());
            }
        }
        Ok(())
    }

    /// Print configuration parameters (debug level only)
    pub fn print_configuration(&self) {
        debug!(
            "Configuration:\n  Solver:        Gauss-Newton\n  Linear solver: {}\n  Convergence Criteria:\n  Max iterations:      {}\n  Relative error tol:  {:.2e}\n  Absolute error tol:  {:.2e}\n  Error threshold:     {:.2e}",
            self.linear_solver_type,
            self.max_iterations,
            self.relative_error_tol,
            self.absolute_error_tol,
            self.error_tol,
        );
    }
}

/// Gauss-Newton optimizer over a [`NonlinearFactorGraph`].
pub struct GaussNewtonOptimizer {
    graph: NonlinearFactorGraph,
    config: GaussNewtonConfig,
    values: Values,
    error: f64,
    iterations: usize,
    ordering: Ordering,
    linear_solver: LinearSystemSolver,
    observers: OptObserverVec,
}

impl GaussNewtonOptimizer {
    pub fn new(
        graph: NonlinearFactorGraph,
        initial: Values,
        config: GaussNewtonConfig,
    ) -> OptimizerResult<Self> {
        config.validate()?;
        if graph.is_empty() {
            return Err(OptimizerError::EmptyProblem.log());
        }
        let error = graph.error(&initial)?;
        let ordering = resolve_ordering(config.ordering.as_ref(), &initial);
        if tracing::enabled!(tracing::Level::DEBUG) {
            config.print_configuration();
            debug!("initial error: {error:.6e}");
        }
        Ok(Self {
            graph,
            values: initial,
            error,
            iterations: 0,
            ordering,
            linear_solver: LinearSystemSolver::new(config.linear_solver_type),
            config,
            observers: OptObserverVec::new(),
        })
    }

    /// Add an observer notified after every iteration.
    pub fn add_observer(&mut self, observer: impl OptObserver + 'static) {
        self.observers.add(observer);
    }

    pub fn config(&self) -> &GaussNewtonConfig {
        &self.config
    }
}

impl NonlinearOptimizer for GaussNewtonOptimizer {
    fn iterate(&mut self) -> OptimizerResult<IterationOutcome> {
        let start = Instant::now();
        let linear = self.graph.linearize(&self.values)?;
        let delta = self
            .linear_solver
            .solve(&linear, &self.ordering)
            .map_err(|e| OptimizerError::from(e).log())?;
        let step_norm = delta.norm();

        self.values = self.values.retract(&delta)?;
        let new_error = self.graph.error(&self.values)?;
        debug!(
            "iteration {}: error {:.6e} -> {:.6e}, |delta| {:.2e}, {:.2}ms",
            self.iterations,
            self.error,
            new_error,
            step_norm,
            start.elapsed().as_secs_f64() * 1000.0
        );
        self.linear_solver.flush_diagnostics();
        self.error = new_error;
        self.iterations += 1;

        self.observers
            .set_iteration_metrics(self.error, None, step_norm, None);
        self.observers.notify(&self.values, self.iterations - 1);
        Ok(IterationOutcome::Accepted)
    }

    fn values(&self) -> &Values {
        &self.values
    }

    fn error(&self) -> f64 {
        self.error
    }

    fn iterations(&self) -> usize {
        self.iterations
    }

    fn convergence_criteria(&self) -> ConvergenceCriteria {
        self.config.convergence_criteria()
    }
}
