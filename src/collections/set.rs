// ABOUTME: Persistent set: a map whose values equal their keys (spec.md §3).

use std::hash::Hash;

use super::capability::Counted;
use super::map::PersistentMap;

#[derive(Clone)]
pub struct PersistentSet<T>(PersistentMap<T, T>);

impl<T: Clone + PartialEq + Hash> PersistentSet<T> {
    pub fn new() -> Self {
        PersistentSet(PersistentMap::new())
    }

    pub fn count(&self) -> usize {
        self.0.count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.0.contains_key(item)
    }

    pub fn conj(&self, item: T) -> Self {
        PersistentSet(self.0.assoc(item.clone(), item))
    }

    pub fn disj(&self, item: &T) -> Self {
        PersistentSet(self.0.dissoc(item))
    }

    pub fn items(&self) -> Vec<T> {
        self.0.entries().into_iter().map(|(k, _)| k).collect()
    }

    /// Builds a set from items, rejecting duplicates (spec.md §4.1: `#{...}`
    /// with a repeated element is a reader error, not a silent de-dup).
    pub fn from_unique_items(items: impl IntoIterator<Item = T>) -> Result<Self, T> {
        let mut set = Self::new();
        for item in items {
            if set.contains(&item) {
                return Err(item);
            }
            set = set.conj(item);
        }
        Ok(set)
    }
}

impl<T: Clone + PartialEq + Hash> Default for PersistentSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq + Hash> PartialEq for PersistentSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: Clone + PartialEq + Hash> Counted for PersistentSet<T> {
    fn count(&self) -> usize {
        self.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conj_and_contains() {
        let s = PersistentSet::new().conj(1).conj(2);
        assert!(s.contains(&1));
        assert!(!s.contains(&3));
    }

    #[test]
    fn duplicate_items_rejected() {
        let result = PersistentSet::from_unique_items([1, 2, 2, 3]);
        assert_eq!(result, Err(2));
    }

    #[test]
    fn disj_sole_item_empties() {
        let s = PersistentSet::new().conj("only");
        assert!(s.disj(&"only").is_empty());
    }
}
