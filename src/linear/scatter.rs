//! Slot assignment for the joint matrix of one elimination step.

use std::collections::HashMap;

use super::{GaussianFactor, Key, LinearError, LinearResult, Ordering};

/// One variable block of the joint matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    pub key: Key,
    pub dim: usize,
}

/// Maps every key touching an elimination step to a contiguous slot.
///
/// Frontal keys come first in the requested order; separator keys follow in
/// elimination order (keys unknown to the ordering go last, ascending). The
/// constant term occupies one extra trailing slot that is not listed here.
#[derive(Debug, Clone, Default)]
pub struct Scatter {
    entries: Vec<SlotEntry>,
    slots: HashMap<Key, usize>,
}

impl Scatter {
    pub fn new<'a>(
        factors: impl IntoIterator<Item = &'a GaussianFactor>,
        frontal_keys: &[Key],
        ordering: Option<&Ordering>,
    ) -> LinearResult<Self> {
        let mut dims: HashMap<Key, usize> = HashMap::new();
        for factor in factors {
            for (&key, dim) in factor.keys().iter().zip(factor.dims()) {
                match dims.get(&key) {
                    Some(&known) if known != dim => {
                        return Err(LinearError::Dimension(format!(
                            "variable {key} has dimension {known} in one factor and {dim} in another"
                        ))
                        .log());
                    }
                    _ => {
                        dims.insert(key, dim);
                    }
                }
            }
        }

        let mut scatter = Scatter::default();
        for &key in frontal_keys {
            let dim = *dims.get(&key).ok_or(LinearError::MissingKey(key))?;
            scatter.push(key, dim)?;
        }

        let mut separators: Vec<Key> = dims
            .keys()
            .copied()
            .filter(|k| !scatter.slots.contains_key(k))
            .collect();
        separators.sort_unstable_by_key(|&k| {
            let position = ordering.and_then(|o| o.position(k)).unwrap_or(usize::MAX);
            (position, k)
        });
        for key in separators {
            scatter.push(key, dims[&key])?;
        }
        Ok(scatter)
    }

    fn push(&mut self, key: Key, dim: usize) -> LinearResult<()> {
        if self.slots.insert(key, self.entries.len()).is_some() {
            return Err(LinearError::DuplicateKey(key).log());
        }
        self.entries.push(SlotEntry { key, dim });
        Ok(())
    }

    pub fn slot(&self, key: Key) -> Option<usize> {
        self.slots.get(&key).copied()
    }

    pub fn entries(&self) -> &[SlotEntry] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<Key> {
        self.entries.iter().map(|e| e.key).collect()
    }

    pub fn dims(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.dim).collect()
    }

    /// Number of variable slots, excluding the constant slot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scalar size of the joint matrix, constant row included.
    pub fn matrix_dim(&self) -> usize {
        self.entries.iter().map(|e| e.dim).sum::<usize>() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::{MeasurementFactor, NoiseModel};
    use nalgebra::{DMatrix, dvector};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn factor(terms: &[(Key, usize)]) -> LinearResult<GaussianFactor> {
        let terms = terms
            .iter()
            .map(|&(k, d)| (k, DMatrix::identity(2, d)))
            .collect();
        Ok(MeasurementFactor::new(terms, dvector![0.0, 0.0], NoiseModel::unit(2))?.into())
    }

    #[test]
    fn test_frontals_first_then_ordering() -> TestResult {
        let factors = [factor(&[(4, 1), (2, 2)])?, factor(&[(2, 2), (9, 1)])?];
        let ordering = Ordering::new(vec![2, 9, 4])?;
        let scatter = Scatter::new(&factors, &[2], Some(&ordering))?;
        assert_eq!(scatter.keys(), vec![2, 9, 4]);
        assert_eq!(scatter.dims(), vec![2, 1, 1]);
        assert_eq!(scatter.slot(4), Some(2));
        assert_eq!(scatter.matrix_dim(), 5);
        Ok(())
    }

    #[test]
    fn test_unordered_keys_go_last_ascending() -> TestResult {
        let factors = [factor(&[(8, 1), (3, 1), (5, 1)])?];
        let ordering = Ordering::new(vec![5])?;
        let scatter = Scatter::new(&factors, &[], Some(&ordering))?;
        assert_eq!(scatter.keys(), vec![5, 3, 8]);
        Ok(())
    }

    #[test]
    fn test_dimension_conflict() -> TestResult {
        let factors = [factor(&[(1, 1)])?, factor(&[(1, 2)])?];
        assert!(matches!(
            Scatter::new(&factors, &[1], None),
            Err(LinearError::Dimension(_))
        ));
        Ok(())
    }

    #[test]
    fn test_unknown_frontal() -> TestResult {
        let factors = [factor(&[(1, 1)])?];
        assert!(matches!(
            Scatter::new(&factors, &[6], None),
            Err(LinearError::MissingKey(6))
        ));
        Ok(())
    }
}
