//! Dense and sparse numerical kernels used by the elimination engine.
//!
//! - [`SymmetricBlockMatrix`]: one contiguous buffer holding an upper-triangular
//!   symmetric block matrix, addressed by block index.
//! - [`cholesky_partial`]: in-place partial Cholesky factorization (frontal rows plus
//!   Schur complement of the remainder).
//! - [`SparseCholeskySolver`]: faer sparse LLᵀ used as the whole-system solve path.

pub mod block_matrix;
pub mod cholesky;
pub mod partial_cholesky;

use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::error;

pub use block_matrix::SymmetricBlockMatrix;
pub use cholesky::{SparseCholeskySolver, SparseSymmetricSystem};
pub use partial_cholesky::cholesky_partial;

/// How a damped linear system is solved inside the optimizers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverType {
    /// Variable-by-variable elimination into a Gaussian Bayes net, then back-substitution.
    #[default]
    SequentialCholesky,
    /// Assemble the whole information matrix and factorize it with faer's sparse LLᵀ.
    SparseCholesky,
}

impl Display for LinearSolverType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LinearSolverType::SequentialCholesky => write!(f, "Sequential Cholesky"),
            LinearSolverType::SparseCholesky => write!(f, "Sparse Cholesky"),
        }
    }
}

/// Linear algebra specific error types
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Block or vector sizes do not agree
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A Cholesky pivot was non-positive or not finite
    #[error("Matrix is not positive definite: pivot {pivot:.6e} at row {index}")]
    NotPositiveDefinite { index: usize, pivot: f64 },

    /// Singular or near-singular matrix detected
    #[error("Singular matrix detected (matrix is not invertible)")]
    SingularMatrix,

    /// Matrix factorization failed for a structural reason
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),

    /// Failed to create sparse matrix from triplets
    #[error("Failed to create sparse matrix: {0}")]
    SparseMatrixCreation(String),
}

impl LinAlgError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| LinAlgError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the faer error that caused it
    ///
    /// # Example
    /// ```ignore
    /// SymbolicLlt::try_new(matrix.symbolic(), Side::Lower)
    ///     .map_err(|e| {
    ///         LinAlgError::FactorizationFailed(
    ///             "Symbolic Cholesky decomposition failed".to_string()
    ///         )
    ///         .log_with_source(e)
    ///     })?;
    /// ```
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }

    /// True for failures that mean "this system has no unique solution"
    /// rather than a malformed input.
    pub fn is_indefinite(&self) -> bool {
        matches!(
            self,
            LinAlgError::NotPositiveDefinite { .. } | LinAlgError::SingularMatrix
        )
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;
