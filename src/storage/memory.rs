//! Volatile engine for tests and throwaway nodes

use crate::common::{Error, Result};
use crate::storage::KvsEngine;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryEngine {
    map: RwLock<HashMap<String, String>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Internal("memory engine lock poisoned".into())
}

impl KvsEngine for MemoryEngine {
    fn set(&self, key: String, value: String) -> Result<()> {
        self.map.write().map_err(poisoned)?.insert(key, value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<String> {
        self.map
            .read()
            .map_err(poisoned)?
            .get(key)
            .cloned()
            .ok_or(Error::KeyNotFound)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.map
            .write()
            .map_err(poisoned)?
            .remove(key)
            .map(|_| ())
            .ok_or(Error::KeyNotFound)
    }

    fn scan(&self) -> Result<Vec<(String, String)>> {
        let mut pairs: Vec<(String, String)> = self
            .map
            .read()
            .map_err(poisoned)?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.sort_unstable();
        Ok(pairs)
    }
}
