//! Key-unique map that iterates in insertion order.
//!
//! Snapshots replay the online-character list and the joined channels in
//! the order the service first reported them, so a plain `HashMap` won't
//! do. Each entry gets a monotonically increasing sequence number; the
//! `BTreeMap` keyed by that number gives the order, and a `HashMap` from
//! key to sequence gives O(1) lookup.

use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct Directory<V> {
    entries: BTreeMap<u64, (String, V)>,
    index: HashMap<String, u64>,
    next_seq: u64,
}

impl<V> Directory<V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Inserts or replaces `key`. A replaced entry keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        if let Some(seq) = self.index.get(&key) {
            if let Some(slot) = self.entries.get_mut(seq) {
                slot.1 = value;
                return;
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(key.clone(), seq);
        self.entries.insert(seq, (key, value));
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let seq = self.index.remove(key)?;
        self.entries.remove(&seq).map(|(_, v)| v)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        let seq = self.index.get(key)?;
        self.entries.get(seq).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let seq = self.index.get(key)?;
        self.entries.get_mut(seq).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values().map(|(_, v)| v)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.values_mut().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

impl<V> Default for Directory<V> {
    fn default() -> Self {
        Self::new()
    }
}
