//! Nonlinear factors on vector-space variables.
//!
//! A factor maps the values of its connected variables to a residual `r(x)` and,
//! on request, the Jacobian `J = ∂r/∂x` stacked over those variables. Weighting is
//! not the factor's concern: the [`NoiseModel`](crate::linear::NoiseModel) of the
//! enclosing [`ResidualBlock`](crate::core::ResidualBlock) whitens the result.
//!
//! - [`PriorFactor`]: `r = x − prior`
//! - [`BetweenFactor`]: `r = (x₂ − x₁) − z`

use nalgebra::{DMatrix, DVector};

pub mod between_factor;
pub mod prior_factor;

pub use between_factor::BetweenFactor;
pub use prior_factor::PriorFactor;

/// Residual and Jacobian evaluation for one measurement.
///
/// Implementations must be thread-safe: residual blocks are linearized in parallel.
///
/// ```
/// use apex_hessian::factors::Factor;
/// use nalgebra::{DMatrix, DVector};
///
/// /// r = x² − target
/// struct Square {
///     target: f64,
/// }
///
/// impl Factor for Square {
///     fn linearize(
///         &self,
///         params: &[DVector<f64>],
///         compute_jacobian: bool,
///     ) -> (DVector<f64>, Option<DMatrix<f64>>) {
///         let x = params[0][0];
///         let residual = DVector::from_element(1, x * x - self.target);
///         let jacobian = compute_jacobian.then(|| DMatrix::from_element(1, 1, 2.0 * x));
///         (residual, jacobian)
///     }
///
///     fn get_dimension(&self) -> usize {
///         1
///     }
/// }
/// ```
pub trait Factor: Send + Sync {
    /// Residual at `params` (one vector per connected variable) and, when
    /// `compute_jacobian` is set, the `residual × Σ dims` Jacobian.
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> (DVector<f64>, Option<DMatrix<f64>>);

    /// Length of the residual.
    fn get_dimension(&self) -> usize;
}
