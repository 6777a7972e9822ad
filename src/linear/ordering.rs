use std::collections::HashMap;

use super::{Key, LinearError, LinearResult};

/// Elimination order of the variables.
///
/// Fill-reducing orderings are computed elsewhere; this type only carries and
/// validates a sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ordering {
    keys: Vec<Key>,
    positions: HashMap<Key, usize>,
}

impl Ordering {
    pub fn new(keys: Vec<Key>) -> LinearResult<Self> {
        let mut positions = HashMap::with_capacity(keys.len());
        for (position, &key) in keys.iter().enumerate() {
            if positions.insert(key, position).is_some() {
                return Err(LinearError::DuplicateKey(key).log());
            }
        }
        Ok(Self { keys, positions })
    }

    /// Ascending key order.
    pub fn natural(keys: impl IntoIterator<Item = Key>) -> Self {
        let mut keys: Vec<Key> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        let positions = keys.iter().enumerate().map(|(p, &k)| (k, p)).collect();
        Self { keys, positions }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn position(&self, key: Key) -> Option<usize> {
        self.positions.get(&key).copied()
    }

    pub fn contains(&self, key: Key) -> bool {
        self.positions.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Key> + '_ {
        self.keys.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_rejected() {
        assert!(matches!(
            Ordering::new(vec![2, 1, 2]),
            Err(LinearError::DuplicateKey(2))
        ));
    }

    #[test]
    fn test_natural_sorts_and_dedups() {
        let ordering = Ordering::natural([5, 1, 3, 1]);
        assert_eq!(ordering.keys(), &[1, 3, 5]);
        assert_eq!(ordering.position(5), Some(2));
        assert_eq!(ordering.position(4), None);
        assert!(ordering.contains(3));
        assert_eq!(ordering.len(), 3);
    }

    #[test]
    fn test_explicit_positions() -> LinearResult<()> {
        let ordering = Ordering::new(vec![7, 2])?;
        assert_eq!(ordering.position(7), Some(0));
        assert_eq!(ordering.iter().collect::<Vec<_>>(), vec![7, 2]);
        Ok(())
    }
}
