//! Weighted random choice shared by task and archetype selection

use std::fmt::Debug;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::{LoadTestError, Result};

/// A validated list of `(key, weight)` pairs with a precomputed sampler.
///
/// Keys are unique and every weight is positive, so every key listed can be
/// chosen and a key that is not listed never is.
#[derive(Debug, Clone)]
pub struct WeightedTable<T> {
    entries: Vec<(T, u32)>,
    index: WeightedIndex<u32>,
}

impl<T: Debug + PartialEq> WeightedTable<T> {
    /// Build a table, rejecting empty input, zero weights and duplicate keys
    pub fn new(entries: Vec<(T, u32)>) -> Result<Self> {
        if entries.is_empty() {
            return Err(LoadTestError::EmptyTable);
        }

        for (i, (key, weight)) in entries.iter().enumerate() {
            if *weight == 0 {
                return Err(LoadTestError::InvalidWeight {
                    key: format!("{:?}", key),
                    weight: *weight,
                });
            }
            if entries[..i].iter().any(|(other, _)| other == key) {
                return Err(LoadTestError::DuplicateKey(format!("{:?}", key)));
            }
        }

        let index = WeightedIndex::new(entries.iter().map(|(_, w)| *w))
            .map_err(|e| LoadTestError::InvalidConfig(e.to_string()))?;

        Ok(Self { entries, index })
    }

    /// Pick one key; each call is independent of the previous ones
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &T {
        &self.entries[self.index.sample(rng)].0
    }

    /// Weight of `key`, or `None` if it is not registered
    pub fn weight_of(&self, key: &T) -> Option<u32> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, w)| *w)
    }

    /// Sum of all weights
    pub fn total_weight(&self) -> u32 {
        self.entries.iter().map(|(_, w)| *w).sum()
    }

    /// Iterate registered keys in declaration order
    pub fn keys(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rejects_empty_table() {
        let result = WeightedTable::<&str>::new(vec![]);
        assert!(matches!(result, Err(LoadTestError::EmptyTable)));
    }

    #[test]
    fn test_rejects_zero_weight() {
        let result = WeightedTable::new(vec![("a", 3), ("b", 0)]);
        assert!(matches!(
            result,
            Err(LoadTestError::InvalidWeight { weight: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let result = WeightedTable::new(vec![("a", 1), ("b", 2), ("a", 3)]);
        assert!(matches!(result, Err(LoadTestError::DuplicateKey(_))));
    }

    #[test]
    fn test_single_entry_always_chosen() {
        let table = WeightedTable::new(vec![("only", 7)]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(*table.choose(&mut rng), "only");
        }
    }

    #[test]
    fn test_frequencies_follow_weights() {
        let table = WeightedTable::new(vec![("heavy", 3), ("light", 1)]).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let samples = 40_000;
        let heavy = (0..samples)
            .filter(|_| *table.choose(&mut rng) == "heavy")
            .count();

        let ratio = heavy as f64 / samples as f64;
        assert!((ratio - 0.75).abs() < 0.02, "heavy ratio was {}", ratio);
    }

    #[test]
    fn test_lookup_helpers() {
        let table = WeightedTable::new(vec![("a", 10), ("b", 1)]).unwrap();
        assert_eq!(table.weight_of(&"a"), Some(10));
        assert_eq!(table.weight_of(&"c"), None);
        assert_eq!(table.total_weight(), 11);
        assert_eq!(table.keys().copied().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(table.len(), 2);
    }
}
