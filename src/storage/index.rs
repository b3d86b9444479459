//! In-memory key index
//!
//! Maps every live key to the location of its most recent record. The index
//! is never persisted; it is rebuilt by replaying segments on open.

use std::collections::HashMap;

/// Location of a framed record on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub gen: u64,
    pub offset: u64,
    pub len: u64,
}

#[derive(Debug, Default)]
pub struct Index {
    map: HashMap<String, IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a key, returning the entry it replaced.
    pub fn insert(&mut self, key: String, entry: IndexEntry) -> Option<IndexEntry> {
        self.map.insert(key, entry)
    }

    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.map.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        self.map.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.map.iter()
    }

    /// Bytes referenced by live entries.
    pub fn live_bytes(&self) -> u64 {
        self.map.values().map(|e| e.len).sum()
    }
}
