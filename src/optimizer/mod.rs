//! Nonlinear least-squares optimizers.
//!
//! Both optimizers follow the same outer loop: linearize the
//! [`NonlinearFactorGraph`](crate::core::NonlinearFactorGraph) at the current
//! estimate, solve the resulting [`GaussianFactorGraph`] by elimination, retract.
//! - [`LevenbergMarquardtOptimizer`]: damped steps with adaptive λ
//! - [`GaussNewtonOptimizer`]: undamped steps
//!
//! [`NonlinearOptimizer::optimize`] drives either one to convergence.

use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::{debug, error, warn};
use web_time::{Duration, Instant};

use crate::core::{CoreError, Values};
use crate::linalg::{LinearSolverType, SparseCholeskySolver};
use crate::linear::{
    EliminationDiagnostics, GaussianFactorGraph, LinearError, LinearResult, Ordering,
    VectorValues,
};

pub mod damping;
pub mod gauss_newton;
pub mod levenberg_marquardt;

pub use damping::DampedSystemBuilder;
pub use gauss_newton::{GaussNewtonConfig, GaussNewtonOptimizer};
pub use levenberg_marquardt::{
    LevenbergMarquardtConfig, LevenbergMarquardtOptimizer, LevenbergMarquardtState,
};

// Re-export observer types from the observers module
pub use crate::observers::{OptObserver, OptObserverVec};

/// Type of optimization algorithm
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerType {
    #[default]
    LevenbergMarquardt,
    GaussNewton,
}

impl Display for OptimizerType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerType::LevenbergMarquardt => write!(f, "Levenberg-Marquardt"),
            OptimizerType::GaussNewton => write!(f, "Gauss-Newton"),
        }
    }
}

/// Optimizer-specific error types
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// Invalid optimization parameters provided
    #[error("Invalid optimization parameters: {0}")]
    InvalidParameters(String),

    /// Problem has no residual blocks
    #[error("Problem has no residual blocks")]
    EmptyProblem,

    /// Evaluating or linearizing the nonlinear problem failed
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Building or solving a linear system failed
    #[error(transparent)]
    Linear(#[from] LinearError),
}

impl OptimizerError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// config.validate().map_err(|e| e.log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the original source error
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Why an optimization ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Relative or absolute decrease of the cost fell below tolerance
    Converged,
    /// Cost fell below the absolute error threshold
    ErrorThresholdReached,
    /// Maximum number of iterations reached
    MaxIterationsReached,
    /// λ exceeded its upper bound without an acceptable step
    LambdaUpperBoundReached,
    /// NaN or Inf detected in the cost
    InvalidNumericalValues,
}

impl Display for OptimizationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Converged => write!(f, "Converged"),
            OptimizationStatus::ErrorThresholdReached => write!(f, "Error threshold reached"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::LambdaUpperBoundReached => {
                write!(f, "Damping upper bound reached")
            }
            OptimizationStatus::InvalidNumericalValues => {
                write!(f, "Invalid numerical values (NaN/Inf) detected")
            }
        }
    }
}

/// Result of one outer iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// A step was accepted and the estimate moved
    Accepted,
    /// A valid step changed the cost by less than the relative tolerance
    StoppedSearching,
    /// λ exceeded its upper bound; the estimate is unchanged
    GaveUp,
}

/// Outer-loop termination thresholds shared by all optimizers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceCriteria {
    pub relative_error_tol: f64,
    pub absolute_error_tol: f64,
    pub error_tol: f64,
    pub max_iterations: usize,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            relative_error_tol: 1e-5,
            absolute_error_tol: 1e-5,
            error_tol: 0.0,
            max_iterations: 100,
        }
    }
}

/// Decide whether the step from `current_error` to `new_error` ends the optimization.
///
/// The error threshold is checked first. A cost increase is never convergence.
pub fn check_convergence(
    relative_error_tol: f64,
    absolute_error_tol: f64,
    error_tol: f64,
    current_error: f64,
    new_error: f64,
) -> Option<OptimizationStatus> {
    if new_error <= error_tol {
        debug!("error {new_error:.6e} below threshold {error_tol:.6e}");
        return Some(OptimizationStatus::ErrorThresholdReached);
    }
    let absolute_decrease = current_error - new_error;
    if absolute_decrease < 0.0 {
        return None;
    }
    let relative_decrease = if current_error > 0.0 {
        absolute_decrease / current_error
    } else {
        0.0
    };
    if relative_decrease <= relative_error_tol || absolute_decrease <= absolute_error_tol {
        debug!(
            "converged: absolute decrease {absolute_decrease:.6e}, relative decrease {relative_decrease:.6e}"
        );
        return Some(OptimizationStatus::Converged);
    }
    None
}

/// Result of a solver execution
#[derive(Debug, Clone)]
pub struct SolverResult {
    /// Final estimate
    pub values: Values,
    pub status: OptimizationStatus,
    pub initial_error: f64,
    pub final_error: f64,
    /// Outer iterations performed
    pub iterations: usize,
    /// Linear solves performed, rejected trials included
    pub inner_iterations: usize,
    pub elapsed_time: Duration,
}

impl Display for SolverResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status: {}", self.status)?;
        writeln!(f, "Error:")?;
        writeln!(f, "  Initial:   {:.6e}", self.initial_error)?;
        writeln!(f, "  Final:     {:.6e}", self.final_error)?;
        writeln!(f, "Iterations:")?;
        writeln!(f, "  Outer:     {}", self.iterations)?;
        writeln!(f, "  Inner:     {}", self.inner_iterations)?;
        write!(
            f,
            "Total time:  {:.2}ms",
            self.elapsed_time.as_secs_f64() * 1000.0
        )
    }
}

/// An iterative nonlinear least-squares optimizer.
pub trait NonlinearOptimizer {
    /// Advance one outer iteration.
    fn iterate(&mut self) -> OptimizerResult<IterationOutcome>;

    /// Current estimate.
    fn values(&self) -> &Values;

    /// Cost at the current estimate.
    fn error(&self) -> f64;

    /// Outer iterations performed so far.
    fn iterations(&self) -> usize;

    /// Linear solves performed so far.
    fn inner_iterations(&self) -> usize {
        self.iterations()
    }

    /// Current damping, for damped optimizers.
    fn lambda(&self) -> Option<f64> {
        None
    }

    fn convergence_criteria(&self) -> ConvergenceCriteria;

    /// Iterate until convergence, the iteration limit, or failure.
    fn optimize(&mut self) -> OptimizerResult<SolverResult> {
        let start_time = Instant::now();
        let criteria = self.convergence_criteria();
        let initial_error = self.error();

        let status = loop {
            let current_error = self.error();
            if !current_error.is_finite() {
                warn!("cost is not finite: {current_error}");
                break OptimizationStatus::InvalidNumericalValues;
            }
            if current_error <= criteria.error_tol {
                break OptimizationStatus::ErrorThresholdReached;
            }
            if self.iterations() >= criteria.max_iterations {
                break OptimizationStatus::MaxIterationsReached;
            }

            match self.iterate()? {
                IterationOutcome::GaveUp => break OptimizationStatus::LambdaUpperBoundReached,
                IterationOutcome::StoppedSearching => break OptimizationStatus::Converged,
                IterationOutcome::Accepted => {}
            }

            if let Some(status) = check_convergence(
                criteria.relative_error_tol,
                criteria.absolute_error_tol,
                criteria.error_tol,
                current_error,
                self.error(),
            ) {
                break status;
            }
        };

        let result = SolverResult {
            values: self.values().clone(),
            status,
            initial_error,
            final_error: self.error(),
            iterations: self.iterations(),
            inner_iterations: self.inner_iterations(),
            elapsed_time: start_time.elapsed(),
        };
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!("{}", result);
        }
        Ok(result)
    }
}

/// Solves linearized systems with the configured backend.
///
/// Owns the state that persists across solves: the sparse symbolic factorization
/// and the elimination diagnostics.
pub(crate) struct LinearSystemSolver {
    solver_type: LinearSolverType,
    sparse: SparseCholeskySolver,
    diagnostics: EliminationDiagnostics,
}

impl LinearSystemSolver {
    pub(crate) fn new(solver_type: LinearSolverType) -> Self {
        Self {
            solver_type,
            sparse: SparseCholeskySolver::new(),
            diagnostics: EliminationDiagnostics::default(),
        }
    }

    pub(crate) fn solve(
        &mut self,
        graph: &GaussianFactorGraph,
        ordering: &Ordering,
    ) -> LinearResult<VectorValues> {
        match self.solver_type {
            LinearSolverType::SequentialCholesky => graph.optimize(ordering, &mut self.diagnostics),
            LinearSolverType::SparseCholesky => {
                graph.optimize_sparse_cholesky(ordering, &mut self.sparse)
            }
        }
    }

    /// Log the elimination timings gathered since the last call, then clear them.
    pub(crate) fn flush_diagnostics(&mut self) {
        if self.diagnostics.steps > 0 && tracing::enabled!(tracing::Level::DEBUG) {
            self.diagnostics.log_summary();
        }
        self.diagnostics.reset();
    }
}

/// Elimination ordering for `values`: the configured one, or ascending keys.
pub(crate) fn resolve_ordering(configured: Option<&Ordering>, values: &Values) -> Ordering {
    match configured {
        Some(ordering) => ordering.clone(),
        None => Ordering::natural(values.keys()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_threshold_checked_first() {
        assert_eq!(
            check_convergence(1e-5, 1e-5, 1e-3, 10.0, 1e-4),
            Some(OptimizationStatus::ErrorThresholdReached)
        );
    }

    #[test]
    fn test_small_decrease_converges() {
        assert_eq!(
            check_convergence(1e-5, 1e-9, 0.0, 1.0, 1.0 - 1e-6),
            Some(OptimizationStatus::Converged)
        );
        assert_eq!(
            check_convergence(1e-9, 1e-5, 0.0, 1e3, 1e3 - 1e-6),
            Some(OptimizationStatus::Converged)
        );
    }

    #[test]
    fn test_large_decrease_continues() {
        assert_eq!(check_convergence(1e-5, 1e-5, 0.0, 10.0, 5.0), None);
    }

    #[test]
    fn test_increase_is_not_convergence() {
        assert_eq!(check_convergence(1e-5, 1e-5, 0.0, 1.0, 1.0 + 1e-9), None);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(OptimizationStatus::Converged.to_string(), "Converged");
        assert_eq!(
            OptimizerType::GaussNewton.to_string(),
            "Gauss-Newton".to_string()
        );
    }
}
