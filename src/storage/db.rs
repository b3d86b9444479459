//! Read-through cache in front of an engine

use crate::common::{Error, Result};
use crate::storage::cache::LruCache;
use crate::storage::KvsEngine;
use std::sync::{Arc, Mutex, MutexGuard};

/// An engine fronted by an optional [`LruCache`].
///
/// Writes go to the engine first and only then to the cache. The cache lock
/// is held across the engine call so a concurrent miss can never repopulate
/// the cache with a value older than the latest write.
pub struct Db {
    engine: Arc<dyn KvsEngine>,
    cache: Option<Mutex<LruCache>>,
}

impl Db {
    pub fn new(engine: Arc<dyn KvsEngine>, cache_capacity: usize) -> Self {
        let cache = (cache_capacity > 0).then(|| Mutex::new(LruCache::new(cache_capacity)));
        Self { engine, cache }
    }

    /// Number of cached entries.
    pub fn cached(&self) -> usize {
        match self.cache() {
            Ok(Some(cache)) => cache.len(),
            _ => 0,
        }
    }

    fn cache(&self) -> Result<Option<MutexGuard<'_, LruCache>>> {
        self.cache
            .as_ref()
            .map(|cache| {
                cache
                    .lock()
                    .map_err(|_| Error::Internal("cache lock poisoned".into()))
            })
            .transpose()
    }
}

impl KvsEngine for Db {
    fn set(&self, key: String, value: String) -> Result<()> {
        match self.cache()? {
            Some(mut cache) => {
                self.engine.set(key.clone(), value.clone())?;
                cache.put(key, value);
                Ok(())
            }
            None => self.engine.set(key, value),
        }
    }

    fn get(&self, key: &str) -> Result<String> {
        match self.cache()? {
            Some(mut cache) => {
                if let Some(value) = cache.get(key) {
                    return Ok(value);
                }
                let value = self.engine.get(key)?;
                cache.put(key.to_string(), value.clone());
                Ok(value)
            }
            None => self.engine.get(key),
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.cache()? {
            Some(mut cache) => {
                cache.remove(key);
                self.engine.remove(key)
            }
            None => self.engine.remove(key),
        }
    }

    fn scan(&self) -> Result<Vec<(String, String)>> {
        self.engine.scan()
    }
}
