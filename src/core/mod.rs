//! Nonlinear problem side of the solver.
//!
//! - [`Values`]: the current estimate, one vector per variable key
//! - [`ResidualBlock`]: a [`Factor`](crate::factors::Factor) bound to its keys and noise model
//! - [`NonlinearFactorGraph`]: the residual blocks of a problem, linearized into a
//!   [`GaussianFactorGraph`](crate::linear::GaussianFactorGraph) once per outer iteration

pub mod graph;
pub mod residual_block;
pub mod values;

use thiserror::Error;
use tracing::error;

use crate::linear::{Key, LinearError};

pub use graph::NonlinearFactorGraph;
pub use residual_block::ResidualBlock;
pub use values::Values;

/// Core module error types for nonlinear problems
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A residual block refers to a variable with no value
    #[error("Variable {0} not found")]
    VariableNotFound(Key),

    /// Dimension mismatch between residual, Jacobian, noise model or variables
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Factor linearization failed
    #[error("Factor linearization failed: {0}")]
    FactorLinearization(String),

    /// Building a linear factor from the linearization failed
    #[error(transparent)]
    Linear(#[from] LinearError),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// values.try_get(key).map_err(|e| e.log())?;
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

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;
