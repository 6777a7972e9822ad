//! Gaussian noise models used to whiten measurement rows.

use nalgebra::{DMatrix, DVector};

use super::{LinearError, LinearResult};

/// Diagonal Gaussian noise on a measurement of dimension `dim()`.
///
/// A `Constrained` model has at least one zero sigma (a hard equality) and
/// cannot be expressed as an information matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseModel {
    Unit { dim: usize },
    Isotropic { dim: usize, sigma: f64 },
    Diagonal { sigmas: DVector<f64> },
    Constrained { sigmas: DVector<f64> },
}

fn check_sigma(sigma: f64) -> LinearResult<()> {
    if !sigma.is_finite() || sigma < 0.0 {
        return Err(LinearError::Dimension(format!(
            "noise sigma must be finite and non-negative, got {sigma}"
        ))
        .log());
    }
    Ok(())
}

impl NoiseModel {
    pub fn unit(dim: usize) -> Self {
        NoiseModel::Unit { dim }
    }

    /// Same sigma on every component. A zero sigma yields a constrained model.
    pub fn isotropic(dim: usize, sigma: f64) -> LinearResult<Self> {
        check_sigma(sigma)?;
        if sigma == 0.0 {
            return Ok(NoiseModel::Constrained {
                sigmas: DVector::zeros(dim),
            });
        }
        Ok(NoiseModel::Isotropic { dim, sigma })
    }

    /// Per-component sigmas. Any zero sigma yields a constrained model.
    pub fn diagonal(sigmas: DVector<f64>) -> LinearResult<Self> {
        for &s in sigmas.iter() {
            check_sigma(s)?;
        }
        if sigmas.iter().any(|&s| s == 0.0) {
            Ok(NoiseModel::Constrained { sigmas })
        } else {
            Ok(NoiseModel::Diagonal { sigmas })
        }
    }

    pub fn constrained(sigmas: DVector<f64>) -> LinearResult<Self> {
        for &s in sigmas.iter() {
            check_sigma(s)?;
        }
        Ok(NoiseModel::Constrained { sigmas })
    }

    pub fn dim(&self) -> usize {
        match self {
            NoiseModel::Unit { dim } | NoiseModel::Isotropic { dim, .. } => *dim,
            NoiseModel::Diagonal { sigmas } | NoiseModel::Constrained { sigmas } => sigmas.len(),
        }
    }

    pub fn is_constrained(&self) -> bool {
        matches!(self, NoiseModel::Constrained { .. })
    }

    pub fn sigmas(&self) -> DVector<f64> {
        match self {
            NoiseModel::Unit { dim } => DVector::from_element(*dim, 1.0),
            NoiseModel::Isotropic { dim, sigma } => DVector::from_element(*dim, *sigma),
            NoiseModel::Diagonal { sigmas } | NoiseModel::Constrained { sigmas } => sigmas.clone(),
        }
    }

    /// Inverse sigmas. Zero sigmas of a constrained model map to infinity.
    pub fn inv_sigmas(&self) -> DVector<f64> {
        self.sigmas()
            .map(|s| if s == 0.0 { f64::INFINITY } else { 1.0 / s })
    }

    /// Inverse variances, the diagonal of `W`.
    pub fn weights(&self) -> DVector<f64> {
        self.inv_sigmas().map(|w| w * w)
    }

    /// Scale each component by its inverse sigma. Components with a zero sigma
    /// are passed through unwhitened.
    pub fn whiten(&self, v: &DVector<f64>) -> DVector<f64> {
        match self {
            NoiseModel::Unit { .. } => v.clone(),
            NoiseModel::Isotropic { sigma, .. } => v / *sigma,
            NoiseModel::Diagonal { sigmas } => v.component_div(sigmas),
            NoiseModel::Constrained { sigmas } => DVector::from_fn(v.len(), |i, _| {
                if sigmas[i] == 0.0 {
                    v[i]
                } else {
                    v[i] / sigmas[i]
                }
            }),
        }
    }

    /// Whiten every row of `a` in place. Fails for constrained models.
    pub fn whiten_rows(&self, a: &mut DMatrix<f64>) -> LinearResult<()> {
        if self.is_constrained() {
            return Err(LinearError::UnsupportedNoiseModel(
                "constrained rows cannot be whitened".to_string(),
            )
            .log());
        }
        if a.nrows() != self.dim() {
            return Err(LinearError::Dimension(format!(
                "noise model of dimension {} applied to {} rows",
                self.dim(),
                a.nrows()
            ))
            .log());
        }
        let inv = self.inv_sigmas();
        for (r, w) in inv.iter().enumerate() {
            a.row_mut(r).scale_mut(*w);
        }
        Ok(())
    }

    /// Half the squared Mahalanobis norm of `v`.
    pub fn squared_error(&self, v: &DVector<f64>) -> f64 {
        0.5 * self.whiten(v).norm_squared()
    }
}
