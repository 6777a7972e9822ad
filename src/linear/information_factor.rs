//! Quadratic factors in information (Hessian) form.
//!
//! An [`InformationFactor`] over variables `x = (x₁ … xₙ)` represents the cost
//!
//! ```text
//! E(x) = 0.5 · (f − 2·xᵗg + xᵗGx)
//! ```
//!
//! stored as the augmented symmetric matrix
//!
//! ```text
//! [ G   g ]
//! [ gᵗ  f ]
//! ```
//!
//! with one block per variable plus a trailing 1×1 constant block. For a whitened
//! measurement `[A b]` this is exactly `[A b]ᵗ[A b]`.

use nalgebra::{DMatrix, DVector};
use tracing::trace;
use web_time::Instant;

use super::{
    EliminationDiagnostics, GaussianBayesNet, GaussianConditional, Key, LinearError,
    LinearResult, MeasurementFactor, Scatter, VectorValues,
};
use crate::linalg::{LinAlgError, SymmetricBlockMatrix, cholesky_partial};

#[derive(Debug, Clone)]
pub struct InformationFactor {
    keys: Vec<Key>,
    info: SymmetricBlockMatrix,
}

impl InformationFactor {
    /// Zero factor over `keys` with the given block dimensions.
    pub fn from_dims(keys: Vec<Key>, dims: &[usize]) -> LinearResult<Self> {
        if keys.len() != dims.len() {
            return Err(LinearError::Dimension(format!(
                "{} keys but {} block dimensions",
                keys.len(),
                dims.len()
            ))
            .log());
        }
        for (i, key) in keys.iter().enumerate() {
            if keys[..i].contains(key) {
                return Err(LinearError::DuplicateKey(*key).log());
            }
        }
        let mut block_dims = dims.to_vec();
        block_dims.push(1);
        Ok(Self {
            keys,
            info: SymmetricBlockMatrix::zeros(&block_dims),
        })
    }

    /// Zero factor laid out by a scatter: one block per slot, in slot order.
    pub fn from_scatter(scatter: &Scatter) -> LinearResult<Self> {
        Self::from_dims(scatter.keys(), &scatter.dims())
    }

    /// Single-variable factor from `G`, `g`, `f`.
    pub fn unary(key: Key, g_mat: DMatrix<f64>, g_vec: DVector<f64>, f: f64) -> LinearResult<Self> {
        let n = g_vec.len();
        if g_mat.nrows() != n || g_mat.ncols() != n {
            return Err(LinearError::Dimension(format!(
                "information block is {}x{} but the linear term has {n} entries",
                g_mat.nrows(),
                g_mat.ncols()
            ))
            .log());
        }
        let mut factor = Self::from_dims(vec![key], &[n])?;
        factor.info.block_mut(0, 0).copy_from(&g_mat);
        factor.info.block_mut(0, 1).set_column(0, &g_vec);
        factor.info.block_mut(1, 1)[(0, 0)] = f;
        factor.assert_invariants()?;
        Ok(factor)
    }

    /// Two-variable factor from the upper blocks `G11`, `G12`, `G22`, the linear
    /// terms `g1`, `g2` and the constant `f`.
    #[allow(clippy::too_many_arguments)]
    pub fn binary(
        key1: Key,
        key2: Key,
        g11: DMatrix<f64>,
        g12: DMatrix<f64>,
        g22: DMatrix<f64>,
        g1: DVector<f64>,
        g2: DVector<f64>,
        f: f64,
    ) -> LinearResult<Self> {
        let (n1, n2) = (g1.len(), g2.len());
        let consistent = g11.shape() == (n1, n1)
            && g12.shape() == (n1, n2)
            && g22.shape() == (n2, n2);
        if !consistent {
            return Err(LinearError::Dimension(format!(
                "blocks {:?}, {:?}, {:?} do not match linear terms of length {n1} and {n2}",
                g11.shape(),
                g12.shape(),
                g22.shape()
            ))
            .log());
        }
        let mut factor = Self::from_dims(vec![key1, key2], &[n1, n2])?;
        factor.info.block_mut(0, 0).copy_from(&g11);
        factor.info.block_mut(0, 1).copy_from(&g12);
        factor.info.block_mut(1, 1).copy_from(&g22);
        factor.info.block_mut(0, 2).set_column(0, &g1);
        factor.info.block_mut(1, 2).set_column(0, &g2);
        factor.info.block_mut(2, 2)[(0, 0)] = f;
        factor.assert_invariants()?;
        Ok(factor)
    }

    /// Weighted normal equations `[A b]ᵗ W [A b]` of a measurement factor.
    pub fn from_measurement(measurement: &MeasurementFactor) -> LinearResult<Self> {
        if measurement.noise_model().is_constrained() {
            return Err(LinearError::UnsupportedNoiseModel(
                "constrained noise models have no information form".to_string(),
            )
            .log());
        }
        let mut factor = Self::from_dims(measurement.keys().to_vec(), &measurement.dims())?;
        let ab = measurement.whitened_augmented()?;
        factor.info.active_mut().copy_from(&(ab.transpose() * &ab));
        factor.assert_invariants()?;
        Ok(factor)
    }

    /// Reset every entry, keeping the layout.
    pub fn set_zero(&mut self) {
        self.info.set_zero();
    }

    /// Reject any non-finite entry of the stored upper triangle.
    pub fn assert_invariants(&self) -> LinearResult<()> {
        match self.info.first_non_finite() {
            Some((row, col)) => Err(LinearError::NonFiniteEntry { row, col }.log()),
            None => Ok(()),
        }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Variable block dimensions, constant block excluded.
    pub fn dims(&self) -> Vec<usize> {
        let mut dims = self.info.dims();
        dims.pop();
        dims
    }

    /// Scalar dimension of the variables, constant excluded.
    pub fn variable_dim(&self) -> usize {
        self.info.dim() - 1
    }

    pub fn matrix(&self) -> &SymmetricBlockMatrix {
        &self.info
    }

    fn constant_block(&self) -> usize {
        self.keys.len()
    }

    /// `f`: twice the cost at `x = 0`.
    pub fn constant_term(&self) -> f64 {
        let c = self.constant_block();
        self.info.block(c, c)[(0, 0)]
    }

    /// `g`, stacked in key order.
    pub fn linear_term(&self) -> DVector<f64> {
        let n = self.variable_dim();
        self.info.active().view((0, n), (n, 1)).column(0).into_owned()
    }

    /// `G` as a full symmetric matrix.
    pub fn information(&self) -> DMatrix<f64> {
        let n = self.variable_dim();
        self.info.full().view((0, 0), (n, n)).into_owned()
    }

    /// The full augmented matrix `[G g; gᵗ f]`.
    pub fn augmented_information(&self) -> DMatrix<f64> {
        self.info.full()
    }

    /// Diagonal of `G`, per variable.
    pub fn hessian_diagonal(&self) -> Vec<(Key, DVector<f64>)> {
        self.keys
            .iter()
            .enumerate()
            .map(|(j, &key)| (key, self.info.block_diagonal(j)))
            .collect()
    }

    /// `0.5 · (f − 2·xᵗg + xᵗGx)`.
    pub fn error(&self, x: &VectorValues) -> LinearResult<f64> {
        let xv = x.vector(&self.keys)?;
        if xv.len() != self.variable_dim() {
            return Err(LinearError::Dimension(format!(
                "values have {} entries, factor has dimension {}",
                xv.len(),
                self.variable_dim()
            ))
            .log());
        }
        let quadratic = xv.dot(&(self.information() * &xv));
        Ok(0.5 * (self.constant_term() - 2.0 * xv.dot(&self.linear_term()) + quadratic))
    }

    /// Structural equality: same keys and every cell within `tol`, ignoring the
    /// constant cell. Two factors that differ only by their cost offset compare equal.
    pub fn equals(&self, other: &InformationFactor, tol: f64) -> bool {
        if self.keys != other.keys || self.dims() != other.dims() {
            return false;
        }
        let mut a = self.info.full();
        let mut b = other.info.full();
        let last = a.nrows() - 1;
        a[(last, last)] = 0.0;
        b[(last, last)] = 0.0;
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tol)
    }

    /// Accumulate `update` into this factor.
    ///
    /// `scatter` must be the layout this factor was built from; each of the
    /// update's keys is routed to its slot, its constant block to the trailing one.
    pub fn update(&mut self, update: &InformationFactor, scatter: &Scatter) -> LinearResult<()> {
        let n = update.keys.len();
        let mut slots = Vec::with_capacity(n + 1);
        for (position, &key) in update.keys.iter().enumerate() {
            let slot = scatter.slot(key).ok_or_else(|| {
                LinearError::InconsistentFactorType(format!(
                    "variable {key} of the update is not part of the joint factor"
                ))
                .log()
            })?;
            if self.info.block_dim(slot) != update.info.block_dim(position) {
                return Err(LinearError::Dimension(format!(
                    "variable {key} has dimension {} in the update but {} in the joint factor",
                    update.info.block_dim(position),
                    self.info.block_dim(slot)
                ))
                .log());
            }
            slots.push(slot);
        }
        slots.push(self.constant_block());

        for j2 in 0..=n {
            for j1 in 0..=j2 {
                let contribution = update.info.block(j1, j2);
                self.info
                    .add_symmetric(slots[j1], slots[j2], &contribution)?;
            }
        }
        Ok(())
    }

    /// Eliminate the first `n_frontals` variables.
    ///
    /// Returns one conditional per frontal variable, in elimination order, and the
    /// remainder factor on the other variables (`None` when nothing remains).
    pub fn eliminate(
        mut self,
        n_frontals: usize,
        diagnostics: &mut EliminationDiagnostics,
    ) -> LinearResult<(GaussianBayesNet, Option<InformationFactor>)> {
        if n_frontals > self.keys.len() {
            return Err(LinearError::Dimension(format!(
                "cannot eliminate {n_frontals} of {} variables",
                self.keys.len()
            ))
            .log());
        }
        let frontal_dim = self.info.block_offset(n_frontals);

        let factorize_start = Instant::now();
        let factorized = cholesky_partial(self.info.active_mut(), frontal_dim);
        diagnostics.factorize += factorize_start.elapsed();
        if let Err(e) = factorized {
            return Err(match e {
                LinAlgError::NotPositiveDefinite { index, pivot } => {
                    let key = self.key_at_scalar(index);
                    trace!("pivot {pivot:.3e} at row {index} of variable {key:?}");
                    LinearError::IndeterminantSystem { key }
                }
                other => LinearError::from(other),
            });
        }

        let extract_start = Instant::now();
        let constant = self.constant_block();
        let mut bayes_net = GaussianBayesNet::new();
        for j in 0..n_frontals {
            let dim = self.info.block_dim(j);
            {
                let mut r = self.info.block_mut(j, j);
                for c in 0..dim {
                    for row in (c + 1)..dim {
                        r[(row, c)] = 0.0;
                    }
                }
            }
            let parents = ((j + 1)..self.keys.len())
                .map(|k| (self.keys[k], self.info.block(j, k).into_owned()))
                .collect();
            let d = self.info.block(j, constant).column(0).into_owned();
            bayes_net.push(GaussianConditional::new(
                self.keys[j],
                self.info.block(j, j).into_owned(),
                parents,
                d,
                DVector::from_element(dim, 1.0),
            )?);
        }

        let remainder = if n_frontals < self.keys.len() {
            self.info.advance_block_start(n_frontals)?;
            if self.info.hidden_dim() > self.info.dim() {
                self.info.compact();
            }
            self.keys = self.keys.split_off(n_frontals);
            Some(self)
        } else {
            None
        };
        diagnostics.extract += extract_start.elapsed();
        diagnostics.eliminated_variables += n_frontals;
        Ok((bayes_net, remainder))
    }

    fn key_at_scalar(&self, index: usize) -> Option<Key> {
        (0..self.keys.len())
            .find(|&j| index < self.info.block_offset(j) + self.info.block_dim(j))
            .map(|j| self.keys[j])
    }
}
