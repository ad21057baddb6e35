//! Concurrent keyed cache of shared values.
//!
//! Used alongside a limiter to remember who holds which slot. The cache owns
//! its entries; the limiter knows nothing about it.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

pub struct KeyedCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Arc<V>>,
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert or replace the value under `key`, returning the stored handle.
    pub fn store(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.entries.insert(key, Arc::clone(&value));
        value
    }

    pub fn load(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove `key`, returning its value if it was present.
    pub fn delete(&self, key: &K) -> Option<Arc<V>> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// Drop every entry. Handles already loaded stay valid.
    pub fn flush(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the current values, in no particular order.
    pub fn values(&self) -> Vec<Arc<V>> {
        self.entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

impl<K, V> Default for KeyedCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}
