//! # Apex Hessian
//!
//! Nonlinear least-squares optimization on factor graphs, solved by variable
//! elimination in information (Hessian) form.
//!
//! ## Layers
//!
//! - [`linalg`]: symmetric block matrix storage, in-place partial Cholesky, and a
//!   faer sparse Cholesky for whole-system solves
//! - [`linear`]: Gaussian factors, scatter, the elimination driver and Gaussian
//!   Bayes nets
//! - [`core`] and [`factors`]: nonlinear residual blocks over vector-valued variables
//! - [`optimizer`]: Levenberg-Marquardt with adaptive damping, and Gauss-Newton
//! - [`observers`]: per-iteration progress callbacks
//!
//! ## Linear solver backends
//!
//! - **Sequential Cholesky**: one variable at a time, producing a Bayes net
//! - **Sparse Cholesky**: the full information matrix factorized by faer

pub mod core;
pub mod error;
pub mod factors;
pub mod linalg;
pub mod linear;
#[cfg(feature = "logging")]
pub mod logger;
pub mod observers;
pub mod optimizer;

pub use core::{NonlinearFactorGraph, Values};
pub use error::{ApexHessianError, ApexHessianResult};

pub use factors::{BetweenFactor, Factor, PriorFactor};

pub use linalg::{LinearSolverType, SparseCholeskySolver};
pub use linear::{
    GaussianBayesNet, GaussianFactorGraph, InformationFactor, Key, MeasurementFactor, NoiseModel,
    Ordering, VectorValues,
};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};
pub use observers::HistoryObserver;
pub use optimizer::{
    GaussNewtonConfig, GaussNewtonOptimizer, LevenbergMarquardtConfig,
    LevenbergMarquardtOptimizer, NonlinearOptimizer, OptObserver, OptObserverVec,
    OptimizationStatus, OptimizerType, SolverResult,
};
