use nalgebra::DVector;
use std::collections::BTreeMap;

use super::{CoreError, CoreResult};
use crate::linear::{Key, VectorValues};

/// Current estimate of every variable of a nonlinear problem.
///
/// Variables live in vector spaces, so retraction is plain addition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    values: BTreeMap<Key, DVector<f64>>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Key, value: DVector<f64>) -> Option<DVector<f64>> {
        self.values.insert(key, value)
    }

    pub fn get(&self, key: Key) -> Option<&DVector<f64>> {
        self.values.get(&key)
    }

    pub fn try_get(&self, key: Key) -> CoreResult<&DVector<f64>> {
        self.values
            .get(&key)
            .ok_or_else(|| CoreError::VariableNotFound(key).log())
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

    /// Total scalar dimension.
    pub fn dim(&self) -> usize {
        self.values.values().map(|v| v.len()).sum()
    }

    pub fn dims(&self) -> BTreeMap<Key, usize> {
        self.values.iter().map(|(k, v)| (*k, v.len())).collect()
    }

    /// `self ⊕ delta`. Keys absent from `delta` keep their value.
    pub fn retract(&self, delta: &VectorValues) -> CoreResult<Values> {
        let mut result = self.clone();
        for (key, step) in delta.iter() {
            let value = result
                .values
                .get_mut(&key)
                .ok_or_else(|| CoreError::VariableNotFound(key).log())?;
            if value.len() != step.len() {
                return Err(CoreError::DimensionMismatch(format!(
                    "variable {key} has dimension {} but its update has {}",
                    value.len(),
                    step.len()
                ))
                .log());
            }
            *value += step;
        }
        Ok(result)
    }

    /// `other ⊖ self`, over the keys of `self`.
    pub fn local_coordinates(&self, other: &Values) -> CoreResult<VectorValues> {
        let mut delta = VectorValues::new();
        for (key, value) in self.iter() {
            let target = other.try_get(key)?;
            if target.len() != value.len() {
                return Err(CoreError::DimensionMismatch(format!(
                    "variable {key} has dimensions {} and {}",
                    value.len(),
                    target.len()
                ))
                .log());
            }
            delta.insert(key, target - value);
        }
        Ok(delta)
    }
}

impl FromIterator<(Key, DVector<f64>)> for Values {
    fn from_iter<I: IntoIterator<Item = (Key, DVector<f64>)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_retract_partial_delta() -> TestResult {
        let values: Values = [(0, dvector![1.0, 2.0]), (1, dvector![3.0])]
            .into_iter()
            .collect();
        let mut delta = VectorValues::new();
        delta.insert(0, dvector![0.5, -0.5]);
        let moved = values.retract(&delta)?;
        assert_eq!(moved.get(0), Some(&dvector![1.5, 1.5]));
        assert_eq!(moved.get(1), Some(&dvector![3.0]));
        assert_eq!(moved.dim(), 3);
        Ok(())
    }

    #[test]
    fn test_retract_unknown_key_or_bad_dim() {
        let values: Values = [(0, dvector![1.0])].into_iter().collect();
        let mut delta = VectorValues::new();
        delta.insert(4, dvector![1.0]);
        assert!(matches!(
            values.retract(&delta),
            Err(CoreError::VariableNotFound(4))
        ));
        let mut delta = VectorValues::new();
        delta.insert(0, dvector![1.0, 1.0]);
        assert!(matches!(
            values.retract(&delta),
            Err(CoreError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_local_coordinates_inverts_retract() -> TestResult {
        let values: Values = [(0, dvector![1.0]), (2, dvector![-1.0, 4.0])]
            .into_iter()
            .collect();
        let mut delta = VectorValues::new();
        delta.insert(0, dvector![0.25]);
        delta.insert(2, dvector![1.0, -2.0]);
        let moved = values.retract(&delta)?;
        assert_eq!(values.local_coordinates(&moved)?, delta);
        Ok(())
    }
}
