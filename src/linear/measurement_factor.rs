//! Linear measurement `‖Σ Aⱼ xⱼ − b‖²_Σ` over a few variables.

use nalgebra::{DMatrix, DVector};

use super::{Key, LinearError, LinearResult, NoiseModel, VectorValues};

/// A (possibly rectangular) Jacobian block per variable, a right-hand side and a
/// noise model. Immutable once built.
#[derive(Debug, Clone)]
pub struct MeasurementFactor {
    keys: Vec<Key>,
    blocks: Vec<DMatrix<f64>>,
    rhs: DVector<f64>,
    noise_model: NoiseModel,
}

impl MeasurementFactor {
    /// Build from `(key, Aⱼ)` terms. Every block must have `rhs.len()` rows and the
    /// noise model must have the same dimension; keys must be unique.
    pub fn new(
        terms: Vec<(Key, DMatrix<f64>)>,
        rhs: DVector<f64>,
        noise_model: NoiseModel,
    ) -> LinearResult<Self> {
        let rows = rhs.len();
        if noise_model.dim() != rows {
            return Err(LinearError::Dimension(format!(
                "noise model dimension {} does not match {} measurement rows",
                noise_model.dim(),
                rows
            ))
            .log());
        }
        let mut keys = Vec::with_capacity(terms.len());
        let mut blocks = Vec::with_capacity(terms.len());
        for (key, block) in terms {
            if block.nrows() != rows {
                return Err(LinearError::Dimension(format!(
                    "Jacobian block for variable {key} has {} rows, expected {rows}",
                    block.nrows()
                ))
                .log());
            }
            if keys.contains(&key) {
                return Err(LinearError::DuplicateKey(key).log());
            }
            keys.push(key);
            blocks.push(block);
        }
        Ok(Self {
            keys,
            blocks,
            rhs,
            noise_model,
        })
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn dims(&self) -> Vec<usize> {
        self.blocks.iter().map(|b| b.ncols()).collect()
    }

    pub fn rows(&self) -> usize {
        self.rhs.len()
    }

    pub fn block(&self, position: usize) -> Option<&DMatrix<f64>> {
        self.blocks.get(position)
    }

    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    pub fn noise_model(&self) -> &NoiseModel {
        &self.noise_model
    }

    /// Unwhitened residual `Σ Aⱼ xⱼ − b`.
    pub fn unweighted_error(&self, x: &VectorValues) -> LinearResult<DVector<f64>> {
        let mut e = -&self.rhs;
        for (key, block) in self.keys.iter().zip(&self.blocks) {
            let xj = x.get(*key).ok_or(LinearError::MissingKey(*key))?;
            if xj.len() != block.ncols() {
                return Err(LinearError::Dimension(format!(
                    "variable {key} has dimension {}, factor expects {}",
                    xj.len(),
                    block.ncols()
                ))
                .log());
            }
            e += block * xj;
        }
        Ok(e)
    }

    /// `0.5 · ‖Σ Aⱼ xⱼ − b‖²_Σ`.
    pub fn error(&self, x: &VectorValues) -> LinearResult<f64> {
        Ok(self.noise_model.squared_error(&self.unweighted_error(x)?))
    }

    /// The augmented matrix `[A b]` with every row whitened.
    pub fn whitened_augmented(&self) -> LinearResult<DMatrix<f64>> {
        let cols: usize = self.blocks.iter().map(|b| b.ncols()).sum::<usize>() + 1;
        let mut ab = DMatrix::zeros(self.rows(), cols);
        let mut offset = 0;
        for block in &self.blocks {
            ab.view_mut((0, offset), (block.nrows(), block.ncols()))
                .copy_from(block);
            offset += block.ncols();
        }
        ab.column_mut(offset).copy_from(&self.rhs);
        self.noise_model.whiten_rows(&mut ab)?;
        Ok(ab)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    type TestResult = Result<(), Box<dyn std::error::Error>>;
    const TOLERANCE: f64 = 1e-12;

    fn between_factor() -> LinearResult<MeasurementFactor> {
        MeasurementFactor::new(
            vec![(1, dmatrix![-1.0]), (2, dmatrix![1.0])],
            dvector![1.0],
            NoiseModel::isotropic(1, 0.5)?,
        )
    }

    #[test]
    fn test_error_is_whitened() -> TestResult {
        let factor = between_factor()?;
        let mut x = VectorValues::new();
        x.insert(1, dvector![0.0]);
        x.insert(2, dvector![3.0]);
        // residual 2, sigma 0.5 -> whitened 4 -> 0.5 * 16
        assert!((factor.error(&x)? - 8.0).abs() < TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_rejects_mismatched_rows() -> TestResult {
        let result = MeasurementFactor::new(
            vec![(0, dmatrix![1.0; 1.0])],
            dvector![1.0],
            NoiseModel::unit(1),
        );
        assert!(matches!(result, Err(LinearError::Dimension(_))));

        let result = MeasurementFactor::new(
            vec![(0, dmatrix![1.0])],
            dvector![1.0],
            NoiseModel::unit(2),
        );
        assert!(matches!(result, Err(LinearError::Dimension(_))));
        Ok(())
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let result = MeasurementFactor::new(
            vec![(0, dmatrix![1.0]), (0, dmatrix![2.0])],
            dvector![1.0],
            NoiseModel::unit(1),
        );
        assert!(matches!(result, Err(LinearError::DuplicateKey(0))));
    }

    #[test]
    fn test_missing_value() -> TestResult {
        let factor = between_factor()?;
        let mut x = VectorValues::new();
        x.insert(1, dvector![0.0]);
        assert!(matches!(factor.error(&x), Err(LinearError::MissingKey(2))));
        Ok(())
    }

    #[test]
    fn test_whitened_augmented_layout() -> TestResult {
        let factor = between_factor()?;
        let ab = factor.whitened_augmented()?;
        assert_eq!(ab, dmatrix![-2.0, 2.0, 2.0]);
        Ok(())
    }
}
