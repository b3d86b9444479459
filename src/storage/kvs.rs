//! Log-structured key-value store
//!
//! Architecture:
//! - Append-only segments named by generation: `<gen>.log`
//! - In-memory index: key -> (generation, offset, length)
//! - Stale-byte accounting for superseded and deleted records
//! - Inline compaction once stale bytes pass a threshold
//!
//! One mutex guards the whole store, so a compaction triggered by a write
//! stalls every other operation until it finishes.

use crate::common::{Error, Result, StorageConfig, SyncPolicy};
use crate::storage::index::{Index, IndexEntry};
use crate::storage::record::{Record, Scan};
use crate::storage::segment::{list_generations, segment_path, SegmentReader, SegmentWriter};
use crate::storage::KvsEngine;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Store statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub keys: usize,
    pub live_bytes: u64,
    pub stale_bytes: u64,
    pub active_generation: u64,
    pub segments: usize,
}

/// Durable store backed by generation-numbered segment files.
pub struct KvStore {
    inner: Mutex<StoreInner>,
}

pub(super) struct StoreInner {
    pub(super) dir: PathBuf,
    pub(super) index: Index,
    /// Lazily opened readers, one per generation
    pub(super) readers: HashMap<u64, SegmentReader>,
    pub(super) writer: SegmentWriter,
    pub(super) current_gen: u64,
    pub(super) stale: u64,
    pub(super) threshold: u64,
    pub(super) sync_policy: SyncPolicy,
}

impl KvStore {
    /// Open with default storage settings.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(dir, &StorageConfig::default())
    }

    /// Open or create a store in `dir`, replaying existing segments.
    pub fn open_with(dir: impl Into<PathBuf>, config: &StorageConfig) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut index = Index::new();
        let mut readers = HashMap::new();
        let mut stale = 0u64;

        let gens = list_generations(&dir)?;
        for &gen in &gens {
            let mut reader = SegmentReader::open(&segment_path(&dir, gen))?;
            stale += replay(gen, &mut reader, &mut index)?;
            readers.insert(gen, reader);
        }

        let current_gen = gens.last().copied().unwrap_or(0) + 1;
        let writer = SegmentWriter::create(&dir, current_gen, config.sync)?;
        readers.insert(current_gen, SegmentReader::open(&segment_path(&dir, current_gen))?);

        info!(
            "KvStore opened at {:?}: {} keys, {} segments replayed, {} stale bytes, active generation {}",
            dir,
            index.len(),
            gens.len(),
            stale,
            current_gen
        );

        let mut inner = StoreInner {
            dir,
            index,
            readers,
            writer,
            current_gen,
            stale,
            threshold: config.compaction_threshold,
            sync_policy: config.sync,
        };
        inner.maybe_compact();

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Rewrite live records now, regardless of the threshold.
    pub fn compact(&self) -> Result<()> {
        self.lock()?.compact()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let inner = self.lock()?;
        Ok(StoreStats {
            keys: inner.index.len(),
            live_bytes: inner.index.live_bytes(),
            stale_bytes: inner.stale,
            active_generation: inner.current_gen,
            segments: list_generations(&inner.dir)?.len(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Internal("store lock poisoned".into()))
    }
}

impl KvsEngine for KvStore {
    fn set(&self, key: String, value: String) -> Result<()> {
        self.lock()?.set(key, value)
    }

    fn get(&self, key: &str) -> Result<String> {
        self.lock()?.get(key)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key)
    }

    fn scan(&self) -> Result<Vec<(String, String)>> {
        let mut inner = self.lock()?;
        let mut keys: Vec<String> = inner.index.iter().map(|(key, _)| key.clone()).collect();
        keys.sort_unstable();
        keys.into_iter()
            .map(|key| {
                let value = inner.get(&key)?;
                Ok((key, value))
            })
            .collect()
    }
}

impl StoreInner {
    fn set(&mut self, key: String, value: String) -> Result<()> {
        let bytes = Record::set(key.as_str(), value).encode()?;
        let offset = self.writer.append(&bytes)?;
        let entry = IndexEntry {
            gen: self.current_gen,
            offset,
            len: bytes.len() as u64,
        };
        if let Some(old) = self.index.insert(key, entry) {
            self.stale += old.len;
        }
        self.maybe_compact();
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<String> {
        let entry = *self.index.get(key).ok_or(Error::KeyNotFound)?;
        let bytes = open_reader(&mut self.readers, &self.dir, entry.gen)?.read_at(entry.offset, entry.len)?;
        match Record::decode(&bytes)? {
            Record::Set { value, .. } => Ok(value),
            Record::Delete { .. } => Err(Error::Encoding(format!(
                "index for {:?} points at a delete marker",
                key
            ))),
        }
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if !self.index.contains(key) {
            return Err(Error::KeyNotFound);
        }
        let bytes = Record::delete(key).encode()?;
        self.writer.append(&bytes)?;
        if let Some(old) = self.index.remove(key) {
            self.stale += old.len + bytes.len() as u64;
        }
        self.maybe_compact();
        Ok(())
    }

    /// Compact when stale bytes pass the threshold.
    ///
    /// A failed compaction leaves every segment in place; the write that
    /// triggered it has already been made durable.
    pub(super) fn maybe_compact(&mut self) {
        if self.stale <= self.threshold {
            return;
        }
        if let Err(e) = self.compact() {
            warn!("Compaction failed, keeping existing segments: {}", e);
        }
    }
}

/// Replay one segment into the index, returning the stale bytes it adds.
fn replay(gen: u64, reader: &mut SegmentReader, index: &mut Index) -> Result<u64> {
    let mut stale = 0u64;
    let mut offset = 0u64;
    let reader = reader.rewind()?;

    loop {
        match Record::read_from(reader)? {
            Scan::Record { record, len } => {
                match record {
                    Record::Set { key, .. } => {
                        if let Some(old) = index.insert(key, IndexEntry { gen, offset, len }) {
                            stale += old.len;
                        }
                    }
                    Record::Delete { key } => {
                        if let Some(old) = index.remove(&key) {
                            stale += old.len;
                        }
                        stale += len;
                    }
                }
                offset += len;
            }
            Scan::End => break,
            Scan::Corrupt(reason) => {
                warn!(
                    "Segment {} has an unreadable tail at offset {}: {}",
                    gen, offset, reason
                );
                break;
            }
        }
    }

    debug!("Replayed segment {}: {} bytes", gen, offset);
    Ok(stale)
}

/// Reader for `gen`, opening and caching it on first use.
pub(super) fn open_reader<'a>(
    readers: &'a mut HashMap<u64, SegmentReader>,
    dir: &Path,
    gen: u64,
) -> Result<&'a mut SegmentReader> {
    match readers.entry(gen) {
        Entry::Occupied(e) => Ok(e.into_mut()),
        Entry::Vacant(e) => Ok(e.insert(SegmentReader::open(&segment_path(dir, gen))?)),
    }
}
