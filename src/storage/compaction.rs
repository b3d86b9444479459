//! Segment compaction
//!
//! Live records are copied verbatim into a fresh segment, the index is
//! redirected to it, and every older segment is deleted. Two generations are
//! reserved per run: `current + 1` receives the copies and `current + 2`
//! becomes the new active segment, so writes after compaction never land in
//! the compaction output.

use crate::common::{format_bytes, Result};
use crate::storage::index::IndexEntry;
use crate::storage::kvs::{open_reader, StoreInner};
use crate::storage::segment::{list_generations, segment_path, SegmentWriter};
use std::fs;
use tracing::{info, warn};

impl StoreInner {
    pub(super) fn compact(&mut self) -> Result<()> {
        let reclaimable = self.stale;
        let compaction_gen = self.current_gen + 1;
        self.current_gen += 2;
        self.writer = SegmentWriter::create(&self.dir, self.current_gen, self.sync_policy)?;

        let moved = match self.copy_live(compaction_gen) {
            Ok(moved) => moved,
            Err(e) => {
                let partial = segment_path(&self.dir, compaction_gen);
                if let Err(rm) = fs::remove_file(&partial) {
                    warn!("Could not remove partial segment {:?}: {}", partial, rm);
                }
                self.readers.remove(&compaction_gen);
                return Err(e);
            }
        };

        for (key, entry) in moved {
            self.index.insert(key, entry);
        }
        self.stale = 0;

        let mut removed = 0usize;
        for gen in list_generations(&self.dir)?
            .into_iter()
            .filter(|gen| *gen < compaction_gen)
        {
            self.readers.remove(&gen);
            match fs::remove_file(segment_path(&self.dir, gen)) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove stale segment {}: {}", gen, e),
            }
        }

        info!(
            "Compaction complete: {} keys into generation {}, {} segments removed, {} reclaimed",
            self.index.len(),
            compaction_gen,
            removed,
            format_bytes(reclaimable)
        );
        Ok(())
    }

    /// Copy every live record into the compaction segment.
    ///
    /// Returns the new index entries without applying them, so a failure
    /// leaves the index pointing at the old segments.
    fn copy_live(&mut self, compaction_gen: u64) -> Result<Vec<(String, IndexEntry)>> {
        let mut out = SegmentWriter::create(&self.dir, compaction_gen, self.sync_policy)?;
        let mut moved = Vec::with_capacity(self.index.len());

        for (key, entry) in self.index.iter() {
            let reader = open_reader(&mut self.readers, &self.dir, entry.gen)?;
            let offset = out.pos();
            reader.copy_to(entry.offset, entry.len, &mut out)?;
            moved.push((
                key.clone(),
                IndexEntry {
                    gen: compaction_gen,
                    offset,
                    len: entry.len,
                },
            ));
        }

        out.commit()?;
        Ok(moved)
    }
}
