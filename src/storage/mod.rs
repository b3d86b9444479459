//! Storage engines
//!
//! - [`KvStore`]: durable log-structured engine with inline compaction
//! - [`MemoryEngine`]: volatile map, selected with `engine = "memory"`
//! - [`Db`]: read-through [`LruCache`] in front of either

pub mod cache;
pub mod compaction;
pub mod db;
pub mod index;
pub mod kvs;
pub mod memory;
pub mod record;
pub mod segment;

pub use cache::LruCache;
pub use db::Db;
pub use kvs::{KvStore, StoreStats};
pub use memory::MemoryEngine;

use crate::common::{Config, EngineKind, Result};
use std::sync::Arc;

/// Capability shared by every engine.
///
/// Implementations synchronize internally; a missing key is reported as
/// [`Error::KeyNotFound`](crate::Error::KeyNotFound) by `get` and `remove`.
pub trait KvsEngine: Send + Sync + 'static {
    fn set(&self, key: String, value: String) -> Result<()>;

    fn get(&self, key: &str) -> Result<String>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Every live pair, ordered by key.
    fn scan(&self) -> Result<Vec<(String, String)>>;
}

impl<E: KvsEngine + ?Sized> KvsEngine for Arc<E> {
    fn set(&self, key: String, value: String) -> Result<()> {
        (**self).set(key, value)
    }

    fn get(&self, key: &str) -> Result<String> {
        (**self).get(key)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn scan(&self) -> Result<Vec<(String, String)>> {
        (**self).scan()
    }
}

/// Build the engine named by the configuration, fronted by its cache.
pub fn open(config: &Config) -> Result<Db> {
    let engine: Arc<dyn KvsEngine> = match config.server.engine {
        EngineKind::Kvs => Arc::new(KvStore::open_with(
            &config.server.data_dir,
            &config.storage,
        )?),
        EngineKind::Memory => Arc::new(MemoryEngine::new()),
    };
    Ok(Db::new(engine, config.server.cache_capacity))
}
