//! Transactional Map
//!
//! A `BTreeMap` that remembers the original value of every key it touches
//! until the ambient transaction commits or rolls back.

use std::collections::BTreeMap;
use std::ops::RangeBounds;

/// Map with commit/rollback of every mutation since the last commit
#[derive(Debug, Clone)]
pub struct TransactionalMap<K, V> {
    current: BTreeMap<K, V>,
    /// First-touch originals; `None` marks keys that did not exist
    journal: BTreeMap<K, Option<V>>,
}

impl<K, V> Default for TransactionalMap<K, V> {
    fn default() -> Self {
        Self {
            current: BTreeMap::new(),
            journal: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> TransactionalMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.current.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.current.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.current.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.current.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.current.values()
    }

    pub fn range<R: RangeBounds<K>>(&self, range: R) -> impl Iterator<Item = (&K, &V)> {
        self.current.range(range)
    }

    fn remember(&mut self, key: &K) {
        if !self.journal.contains_key(key) {
            self.journal.insert(key.clone(), self.current.get(key).cloned());
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.remember(&key);
        self.current.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        if !self.current.contains_key(key) {
            return None;
        }
        self.remember(key);
        self.current.remove(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.current.contains_key(key) {
            return None;
        }
        self.remember(key);
        self.current.get_mut(key)
    }

    /// Whether uncommitted changes exist
    pub fn is_dirty(&self) -> bool {
        !self.journal.is_empty()
    }

    pub fn commit(&mut self) {
        self.journal.clear();
    }

    pub fn rollback(&mut self) {
        for (key, original) in std::mem::take(&mut self.journal) {
            match original {
                Some(value) => {
                    self.current.insert(key, value);
                }
                None => {
                    self.current.remove(&key);
                }
            }
        }
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for TransactionalMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.current == other.current
    }
}

impl<K: Ord, V> FromIterator<(K, V)> for TransactionalMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            current: iter.into_iter().collect(),
            journal: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_keeps_changes() {
        let mut map = TransactionalMap::new();
        map.insert("a", 1);
        map.commit();
        assert!(!map.is_dirty());
        map.rollback();
        assert_eq!(map.get(&"a"), Some(&1));
    }

    #[test]
    fn test_rollback_restores_first_touch() {
        let mut map: TransactionalMap<&str, i32> = [("a", 1), ("b", 2)].into_iter().collect();

        map.insert("a", 10);
        map.insert("a", 20);
        map.remove(&"b");
        map.insert("c", 3);
        *map.get_mut(&"c").unwrap() += 1;
        assert_eq!(map.len(), 2);

        map.rollback();
        assert_eq!(map.get(&"a"), Some(&1));
        assert_eq!(map.get(&"b"), Some(&2));
        assert_eq!(map.get(&"c"), None);
        assert!(!map.is_dirty());
    }

    #[test]
    fn test_untouched_keys_not_journaled() {
        let mut map: TransactionalMap<u32, u32> = TransactionalMap::new();
        assert_eq!(map.remove(&7), None);
        assert!(map.get_mut(&7).is_none());
        assert!(!map.is_dirty());
    }
}
