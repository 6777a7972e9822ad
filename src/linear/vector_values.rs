use nalgebra::DVector;
use std::collections::BTreeMap;

use super::{Key, LinearError, LinearResult};

/// Ordered map from variable key to a vector, used for linear deltas and solutions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorValues {
    values: BTreeMap<Key, DVector<f64>>,
}

impl VectorValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero vectors of the given dimensions.
    pub fn zeros(dims: impl IntoIterator<Item = (Key, usize)>) -> Self {
        Self {
            values: dims
                .into_iter()
                .map(|(key, dim)| (key, DVector::zeros(dim)))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: Key, value: DVector<f64>) -> Option<DVector<f64>> {
        self.values.insert(key, value)
    }

    pub fn get(&self, key: Key) -> Option<&DVector<f64>> {
        self.values.get(&key)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.values.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.values.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &DVector<f64>)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    /// Inner product over the keys present in both.
    pub fn dot(&self, other: &VectorValues) -> f64 {
        self.values
            .iter()
            .filter_map(|(k, v)| other.values.get(k).map(|w| v.dot(w)))
            .sum()
    }

    pub fn norm(&self) -> f64 {
        self.values
            .values()
            .map(|v| v.norm_squared())
            .sum::<f64>()
            .sqrt()
    }

    pub fn scale(&self, alpha: f64) -> VectorValues {
        Self {
            values: self
                .values
                .iter()
                .map(|(k, v)| (*k, v * alpha))
                .collect(),
        }
    }

    /// Sum over the union of keys. Shared keys must agree in dimension.
    pub fn add(&self, other: &VectorValues) -> LinearResult<VectorValues> {
        let mut result = self.clone();
        for (key, w) in &other.values {
            match result.values.get_mut(key) {
                Some(v) if v.len() == w.len() => *v += w,
                Some(v) => {
                    return Err(LinearError::Dimension(format!(
                        "cannot add vectors of dimension {} and {} for variable {key}",
                        v.len(),
                        w.len()
                    ))
                    .log());
                }
                None => {
                    result.values.insert(*key, w.clone());
                }
            }
        }
        Ok(result)
    }

    /// Stack the vectors of `keys` into one column, in that order.
    pub fn vector(&self, keys: &[Key]) -> LinearResult<DVector<f64>> {
        let mut pieces = Vec::with_capacity(keys.len());
        for key in keys {
            pieces.push(self.values.get(key).ok_or(LinearError::MissingKey(*key))?);
        }
        let total = pieces.iter().map(|v| v.len()).sum();
        let mut stacked = DVector::zeros(total);
        let mut offset = 0;
        for v in pieces {
            stacked.rows_mut(offset, v.len()).copy_from(v);
            offset += v.len();
        }
        Ok(stacked)
    }

    /// Split `stacked` into per-key vectors following `(key, dim)` layout.
    pub fn from_vector(layout: &[(Key, usize)], stacked: &DVector<f64>) -> LinearResult<Self> {
        let total: usize = layout.iter().map(|(_, d)| d).sum();
        if total != stacked.len() {
            return Err(LinearError::Dimension(format!(
                "layout covers {total} entries but the vector has {}",
                stacked.len()
            ))
            .log());
        }
        let mut values = BTreeMap::new();
        let mut offset = 0;
        for &(key, dim) in layout {
            values.insert(key, stacked.rows(offset, dim).into_owned());
            offset += dim;
        }
        Ok(Self { values })
    }
}

impl FromIterator<(Key, DVector<f64>)> for VectorValues {
    fn from_iter<I: IntoIterator<Item = (Key, DVector<f64>)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
