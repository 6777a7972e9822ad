//! Residual blocks: a factor bound to its variables and its noise model.
//!
//! Linearizing a block at the current estimate gives the measurement factor
//!
//! ```text
//! r(x ⊕ δ) ≈ r(x) + J·δ   ⇒   A = J,  b = −r(x)
//! ```
//!
//! with `J` split into one column block per connected variable. Whitening by the
//! noise model happens later, when the factor is converted to information form.

use nalgebra::DVector;

use crate::core::{CoreError, CoreResult, Values};
use crate::factors::Factor;
use crate::linear::{Key, MeasurementFactor, NoiseModel};

pub struct ResidualBlock {
    /// Keys of the connected variables, in the order the factor expects them
    pub keys: Vec<Key>,
    pub factor: Box<dyn Factor + Send + Sync>,
    pub noise_model: NoiseModel,
}

impl ResidualBlock {
    pub fn new(keys: &[Key], factor: Box<dyn Factor + Send + Sync>, noise_model: NoiseModel) -> Self {
        ResidualBlock {
            keys: keys.to_vec(),
            factor,
            noise_model,
        }
    }

    fn params(&self, values: &Values) -> CoreResult<Vec<DVector<f64>>> {
        self.keys
            .iter()
            .map(|&key| values.try_get(key).cloned())
            .collect()
    }

    fn check_residual(&self, residual: &DVector<f64>) -> CoreResult<()> {
        if residual.len() != self.noise_model.dim() {
            return Err(CoreError::DimensionMismatch(format!(
                "factor on {:?} returned a residual of length {} for a noise model of dimension {}",
                self.keys,
                residual.len(),
                self.noise_model.dim()
            ))
            .log());
        }
        Ok(())
    }

    /// Unwhitened residual `r(x)`.
    pub fn residual(&self, values: &Values) -> CoreResult<DVector<f64>> {
        let (residual, _) = self.factor.linearize(&self.params(values)?, false);
        self.check_residual(&residual)?;
        Ok(residual)
    }

    /// `0.5·‖r(x)‖²_Σ`.
    pub fn error(&self, values: &Values) -> CoreResult<f64> {
        let residual = self.residual(values)?;
        Ok(self.noise_model.squared_error(&residual))
    }

    /// First-order model of this block at `values`.
    pub fn linearize(&self, values: &Values) -> CoreResult<MeasurementFactor> {
        let params = self.params(values)?;
        let (residual, jacobian) = self.factor.linearize(&params, true);
        self.check_residual(&residual)?;
        let jacobian = jacobian.ok_or_else(|| {
            CoreError::FactorLinearization(
                "Factor returned None for Jacobian when compute_jacobian=true".to_string(),
            )
            .log()
        })?;

        let total: usize = params.iter().map(|p| p.len()).sum();
        if jacobian.nrows() != residual.len() || jacobian.ncols() != total {
            return Err(CoreError::DimensionMismatch(format!(
                "Jacobian is {}x{}, expected {}x{}",
                jacobian.nrows(),
                jacobian.ncols(),
                residual.len(),
                total
            ))
            .log());
        }

        let mut terms = Vec::with_capacity(self.keys.len());
        let mut col = 0;
        for (&key, param) in self.keys.iter().zip(&params) {
            terms.push((key, jacobian.columns(col, param.len()).into_owned()));
            col += param.len();
        }
        Ok(MeasurementFactor::new(
            terms,
            -residual,
            self.noise_model.clone(),
        )?)
    }
}
