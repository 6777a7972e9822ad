//! Levenberg-Marquardt damping as extra factors.
//!
//! Instead of editing the information matrix, damping appends one prior per
//! variable to a copy of the linearized graph:
//!
//! ```text
//! A = I (or diag(√dᵢ)),  b = 0,  σ = 1/√λ   ⇒   G += λ·I (or λ·diag(dᵢ))
//! ```
//!
//! where `dᵢ` is the diagonal of the undamped information matrix clamped to
//! `[min_diagonal, max_diagonal]`. The linearized factors are shared, so trying
//! another λ only rebuilds the priors.

use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;
use tracing::trace;

use crate::linear::{
    GaussianFactorGraph, Key, LinearResult, MeasurementFactor, NoiseModel, VectorValues,
};

/// Lower clamp of the damping diagonal.
pub const MIN_DIAGONAL: f64 = 1e-6;
/// Upper clamp of the damping diagonal.
pub const MAX_DIAGONAL: f64 = 1e32;

#[derive(Debug, Clone)]
pub struct DampedSystemBuilder {
    min_diagonal: f64,
    max_diagonal: f64,
    /// `√clamp(diag G)` of the current linearization
    sqrt_diagonal: Option<VectorValues>,
}

impl Default for DampedSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DampedSystemBuilder {
    pub fn new() -> Self {
        Self {
            min_diagonal: MIN_DIAGONAL,
            max_diagonal: MAX_DIAGONAL,
            sqrt_diagonal: None,
        }
    }

    /// Drop the cached diagonal. Required whenever the linearization changes.
    pub fn invalidate(&mut self) {
        self.sqrt_diagonal = None;
    }

    pub fn has_cached_diagonal(&self) -> bool {
        self.sqrt_diagonal.is_some()
    }

    fn sqrt_diagonal(&mut self, linear: &GaussianFactorGraph) -> LinearResult<&VectorValues> {
        if self.sqrt_diagonal.is_none() {
            let (lo, hi) = (self.min_diagonal, self.max_diagonal);
            let sqrt_diagonal = linear
                .hessian_diagonal()?
                .iter()
                .map(|(key, d)| (key, d.map(|v| v.clamp(lo, hi).sqrt())))
                .collect();
            self.sqrt_diagonal = Some(sqrt_diagonal);
        }
        Ok(self.sqrt_diagonal.get_or_insert_with(VectorValues::new))
    }

    /// Copy of `linear` with one damping prior per variable of `dims`.
    ///
    /// With `diagonal_damping`, variables that no factor touches get no prior.
    /// A non-positive λ returns the undamped copy.
    pub fn build(
        &mut self,
        linear: &GaussianFactorGraph,
        dims: &BTreeMap<Key, usize>,
        lambda: f64,
        diagonal_damping: bool,
    ) -> LinearResult<GaussianFactorGraph> {
        let mut damped = GaussianFactorGraph::with_capacity(linear.len() + dims.len());
        for factor in linear.iter() {
            damped.add_shared(factor.clone());
        }
        if lambda <= 0.0 {
            return Ok(damped);
        }

        let sigma = 1.0 / lambda.sqrt();
        if diagonal_damping {
            let sqrt_diagonal = self.sqrt_diagonal(linear)?;
            for (&key, &dim) in dims {
                let Some(d) = sqrt_diagonal.get(key) else {
                    trace!("variable {key} has no diagonal entry, not damped");
                    continue;
                };
                damped.add(MeasurementFactor::new(
                    vec![(key, DMatrix::from_diagonal(d))],
                    DVector::zeros(dim),
                    NoiseModel::isotropic(dim, sigma)?,
                )?);
            }
        } else {
            for (&key, &dim) in dims {
                damped.add(MeasurementFactor::new(
                    vec![(key, DMatrix::identity(dim, dim))],
                    DVector::zeros(dim),
                    NoiseModel::isotropic(dim, sigma)?,
                )?);
            }
        }
        Ok(damped)
    }
}
