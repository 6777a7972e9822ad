//! Error types for the apex-hessian library
//!
//! Every module defines its own error enum with `thiserror`; [`ApexHessianError`]
//! wraps them transparently so callers can use a single `?` across layers while
//! still matching on the module error inside.
//!
//! Example error chain:
//! ```text
//! ApexHessianError::Optimizer(
//!     OptimizerError::Linear(
//!         LinearError::IndeterminantSystem { key: Some(7) }
//!     )
//! )
//! ```

use crate::{
    core::CoreError, linalg::LinAlgError, linear::LinearError, observers::ObserverError,
    optimizer::OptimizerError,
};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type used throughout the apex-hessian library
pub type ApexHessianResult<T> = Result<T, ApexHessianError>;

/// Top-level error type of the library.
///
/// ```rust,ignore
/// if let Err(e) = optimizer.optimize() {
///     let e = ApexHessianError::from(e);
///     warn!("Full chain: {}", e.chain());
/// }
/// ```
#[derive(Debug, Error)]
pub enum ApexHessianError {
    /// Dense and sparse kernel errors
    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),

    /// Gaussian factor and elimination errors
    #[error(transparent)]
    Linear(#[from] LinearError),

    /// Nonlinear graph and values errors
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Optimization algorithm errors
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    /// Observer errors
    #[error(transparent)]
    Observer(#[from] ObserverError),
}

impl ApexHessianError {
    /// Full error chain, one cause per line.
    ///
    /// ```rust,ignore
    /// warn!("Error chain: {}", e.chain());
    /// // Linear algebra error: Singular matrix detected (matrix is not invertible)
    /// //   → Singular matrix detected (matrix is not invertible)
    /// ```
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Single-line error chain for logging
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}
