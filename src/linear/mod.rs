//! Linear (Gaussian) factor graphs in information form and their elimination.
//!
//! A linearized problem is a [`GaussianFactorGraph`] whose factors are either
//! [`MeasurementFactor`]s (whitened Jacobian rows) or [`InformationFactor`]s
//! (quadratic costs `0.5·(f − 2xᵗg + xᵗGx)`). Elimination turns the graph into a
//! [`GaussianBayesNet`] one variable at a time:
//!
//! ```text
//! factors on x ──scatter──► joint InformationFactor ──partial Cholesky──► conditional p(x | S)
//!                                                                    └──► remainder factor on S
//! ```
//!
//! and back-substitution over the Bayes net yields the solution.

pub mod conditional;
pub mod elimination;
pub mod factor_graph;
pub mod information_factor;
pub mod measurement_factor;
pub mod noise_model;
pub mod ordering;
pub mod scatter;
pub mod vector_values;

use std::borrow::Cow;
use thiserror::Error;
use tracing::error;

use crate::linalg::LinAlgError;

pub use conditional::{GaussianBayesNet, GaussianConditional};
pub use elimination::{EliminationDiagnostics, eliminate_cholesky, eliminate_sequential};
pub use factor_graph::GaussianFactorGraph;
pub use information_factor::InformationFactor;
pub use measurement_factor::MeasurementFactor;
pub use noise_model::NoiseModel;
pub use ordering::Ordering;
pub use scatter::{Scatter, SlotEntry};
pub use vector_values::VectorValues;

/// Dense integer identifier of one variable block.
pub type Key = usize;

fn near_key(key: &Option<Key>) -> String {
    match key {
        Some(k) => format!(" while eliminating variable {k}"),
        None => String::new(),
    }
}

/// Errors raised while building or eliminating linear factors
#[derive(Debug, Clone, Error)]
pub enum LinearError {
    /// Mismatched matrix/vector sizes in a factor or between factors
    #[error("Dimension error: {0}")]
    Dimension(String),

    /// The noise model has no information-form representation
    #[error("Unsupported noise model: {0}")]
    UnsupportedNoiseModel(String),

    /// A pivot was non-positive: the system is under-constrained or ill-posed
    #[error("Indeterminant linear system{}", near_key(.key))]
    IndeterminantSystem { key: Option<Key> },

    /// A factor could not be accumulated into the joint system
    #[error("Inconsistent factor type: {0}")]
    InconsistentFactorType(String),

    /// An assembled information matrix holds a NaN or infinity
    #[error("Non-finite entry at ({row}, {col}) of an information matrix")]
    NonFiniteEntry { row: usize, col: usize },

    /// A variable required by the operation has no value or no factor
    #[error("Variable {0} is missing")]
    MissingKey(Key),

    /// A variable appears twice where keys must be unique
    #[error("Variable {0} appears more than once")]
    DuplicateKey(Key),

    /// Underlying numerical kernel failure
    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] LinAlgError),
}

impl LinearError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the error that caused it
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }

    /// The only recoverable variant: a trial system without a unique solution.
    pub fn is_indeterminant(&self) -> bool {
        matches!(self, LinearError::IndeterminantSystem { .. })
    }
}

/// Result type for linear factor operations
pub type LinearResult<T> = Result<T, LinearError>;

/// A linear factor in one of the two supported representations.
#[derive(Debug, Clone)]
pub enum GaussianFactor {
    Information(InformationFactor),
    Measurement(MeasurementFactor),
}

impl GaussianFactor {
    pub fn keys(&self) -> &[Key] {
        match self {
            GaussianFactor::Information(f) => f.keys(),
            GaussianFactor::Measurement(f) => f.keys(),
        }
    }

    /// Block dimension of each key, in key order.
    pub fn dims(&self) -> Vec<usize> {
        match self {
            GaussianFactor::Information(f) => f.dims(),
            GaussianFactor::Measurement(f) => f.dims(),
        }
    }

    /// Cost of this factor at `x`.
    pub fn error(&self, x: &VectorValues) -> LinearResult<f64> {
        match self {
            GaussianFactor::Information(f) => f.error(x),
            GaussianFactor::Measurement(f) => f.error(x),
        }
    }

    /// The information form of this factor, borrowed when it already is one.
    pub fn to_information(&self) -> LinearResult<Cow<'_, InformationFactor>> {
        match self {
            GaussianFactor::Information(f) => Ok(Cow::Borrowed(f)),
            GaussianFactor::Measurement(f) => {
                Ok(Cow::Owned(InformationFactor::from_measurement(f)?))
            }
        }
    }
}

impl From<InformationFactor> for GaussianFactor {
    fn from(factor: InformationFactor) -> Self {
        GaussianFactor::Information(factor)
    }
}

impl From<MeasurementFactor> for GaussianFactor {
    fn from(factor: MeasurementFactor) -> Self {
        GaussianFactor::Measurement(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, dvector};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_indeterminant_display_names_key() {
        let e = LinearError::IndeterminantSystem { key: Some(7) };
        assert!(e.to_string().contains("variable 7"));
        let e = LinearError::IndeterminantSystem { key: None };
        assert_eq!(e.to_string(), "Indeterminant linear system");
        assert!(e.is_indeterminant());
        assert!(!LinearError::MissingKey(1).is_indeterminant());
    }

    #[test]
    fn test_information_form_borrowed_or_converted() -> TestResult {
        let info = InformationFactor::unary(0, DMatrix::identity(1, 1), dvector![1.0], 1.0)?;
        let factor = GaussianFactor::from(info);
        assert!(matches!(factor.to_information()?, Cow::Borrowed(_)));

        let measurement = MeasurementFactor::new(
            vec![(0, DMatrix::identity(1, 1))],
            dvector![1.0],
            NoiseModel::unit(1),
        )?;
        let factor = GaussianFactor::from(measurement);
        assert!(matches!(factor.to_information()?, Cow::Owned(_)));
        assert_eq!(factor.keys(), &[0]);
        assert_eq!(factor.dims(), vec![1]);
        Ok(())
    }
}
