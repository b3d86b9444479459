//! Durable raft log
//!
//! Files under the raft directory, all framed as `[LEN:4 LE][CRC32:4 LE][BODY]`
//! around a protobuf message:
//! - `entries.log`: appended log entries
//! - `state`: hard state followed by conf state
//! - `snapshot`: the latest snapshot, metadata and data
//!
//! `state` and `snapshot` are replaced whole through a temporary file and a
//! rename. Appends that overwrite a suffix of the log are written as they
//! arrive; replay keeps the latest entry for each index. Everything is also
//! kept in memory, so the files are only read at startup.
//!
//! Snapshots are cut by the node on demand. When raft asks for one this store
//! cannot serve (too old, or missing the member it is for), it records the
//! request and answers `SnapshotTemporarilyUnavailable`; raft retries later.

use crate::common::{crc32, Error, Result, SyncPolicy};
use protobuf::Message as PbMessage;
use raft::prelude::{ConfState, Entry, HardState, Snapshot};
use raft::util::limit_size;
use raft::{GetEntriesContext, RaftState, Storage, StorageError};
use std::cmp;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

const ENTRIES_FILE: &str = "entries.log";
const STATE_FILE: &str = "state";
const SNAPSHOT_FILE: &str = "snapshot";
const HEADER_LEN: u64 = 8;

/// Raft [`Storage`] backed by files. Clones share the same log.
#[derive(Clone)]
pub struct LogStore {
    core: Arc<RwLock<Core>>,
}

struct Core {
    dir: PathBuf,
    sync_policy: SyncPolicy,
    log: BufWriter<File>,
    hard_state: HardState,
    conf_state: ConfState,
    snapshot: Snapshot,
    /// `entries[0].index` is always the snapshot index plus one
    entries: Vec<Entry>,
    snapshot_wanted: bool,
}

impl LogStore {
    /// Open the log in `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>, sync_policy: SyncPolicy) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let snapshot: Snapshot = match read_frames(&dir.join(SNAPSHOT_FILE))?.0.first() {
            Some(body) => parse(body)?,
            None => Snapshot::default(),
        };

        let (state, _) = read_frames(&dir.join(STATE_FILE))?;
        let (hard_state, conf_state): (HardState, ConfState) = match state.as_slice() {
            [] => (HardState::default(), ConfState::default()),
            [hs, cs, ..] => (parse(hs)?, parse(cs)?),
            [_] => return Err(Error::Encoding("raft state file is damaged".into())),
        };

        let log_path = dir.join(ENTRIES_FILE);
        let (frames, good_len) = read_frames(&log_path)?;
        let snapshot_index = snapshot.get_metadata().index;
        let mut entries: Vec<Entry> = Vec::new();
        for body in &frames {
            let entry: Entry = parse(body)?;
            if entry.index <= snapshot_index {
                continue;
            }
            let next = snapshot_index + 1 + entries.len() as u64;
            if entry.index > next {
                return Err(Error::Encoding(format!(
                    "raft log jumps from index {} to {}",
                    next - 1,
                    entry.index
                )));
            }
            entries.truncate((entry.index - snapshot_index - 1) as usize);
            entries.push(entry);
        }

        let file = open_log(&log_path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > good_len {
            warn!(
                "Raft log {:?} has an unreadable tail, truncating {} bytes",
                log_path,
                on_disk - good_len
            );
            file.set_len(good_len)?;
        }

        info!(
            "Raft log opened at {:?}: term {}, commit {}, snapshot {}, {} entries",
            dir,
            hard_state.term,
            hard_state.commit,
            snapshot_index,
            entries.len()
        );

        Ok(Self {
            core: Arc::new(RwLock::new(Core {
                dir,
                sync_policy,
                log: BufWriter::new(file),
                hard_state,
                conf_state,
                snapshot,
                entries,
                snapshot_wanted: false,
            })),
        })
    }

    /// Has a configuration been recorded, either at bootstrap or since?
    pub fn is_initialized(&self) -> bool {
        let core = self.rl();
        !core.conf_state.get_voters().is_empty() || !core.conf_state.get_learners().is_empty()
    }

    /// Record the initial voter set of a fresh log.
    pub fn initialize(&self, voters: &[u64]) -> Result<()> {
        let mut core = self.wl();
        core.conf_state = ConfState::from((voters.to_vec(), vec![]));
        core.save_state()
    }

    pub fn hard_state(&self) -> HardState {
        self.rl().hard_state.clone()
    }

    pub fn conf_state(&self) -> ConfState {
        self.rl().conf_state.clone()
    }

    pub fn latest_snapshot(&self) -> Snapshot {
        self.rl().snapshot.clone()
    }

    /// Append entries, replacing any existing suffix they overlap.
    pub fn append(&self, entries: &[Entry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut core = self.wl();
        let first = entries[0].index;
        if first < core.first_index() {
            return Err(Error::Internal(format!(
                "append at {} overwrites compacted entries (first index {})",
                first,
                core.first_index()
            )));
        }
        if first > core.last_index() + 1 {
            return Err(Error::Internal(format!(
                "append at {} leaves a gap after {}",
                first,
                core.last_index()
            )));
        }

        if let Err(e) = core.write_entries(entries) {
            // drop whatever reached the buffer and restore the file from memory
            if let Err(rewrite) = core.rewrite_log() {
                warn!("Could not restore raft log after failed append: {}", rewrite);
            }
            return Err(e);
        }

        let keep = (first - core.first_index()) as usize;
        core.entries.truncate(keep);
        core.entries.extend_from_slice(entries);
        Ok(())
    }

    pub fn set_hard_state(&self, hard_state: HardState) -> Result<()> {
        let mut core = self.wl();
        core.hard_state = hard_state;
        core.save_state()
    }

    pub fn set_commit(&self, commit: u64) -> Result<()> {
        let mut core = self.wl();
        core.hard_state.commit = commit;
        core.save_state()
    }

    pub fn set_conf_state(&self, conf_state: ConfState) -> Result<()> {
        let mut core = self.wl();
        core.conf_state = conf_state;
        core.save_state()
    }

    /// Replace the whole log with a snapshot received from the leader.
    pub fn apply_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut core = self.wl();
        let meta = snapshot.get_metadata();
        if meta.index < core.first_index() {
            return Err(raft::Error::Store(StorageError::SnapshotOutOfDate).into());
        }

        core.hard_state.term = cmp::max(core.hard_state.term, meta.term);
        core.hard_state.commit = meta.index;
        core.conf_state = meta.get_conf_state().clone();
        core.entries.clear();
        core.snapshot = snapshot;

        core.save_snapshot()?;
        core.save_state()?;
        core.rewrite_log()
    }

    /// Cut a snapshot at `index` holding `data` and drop every entry up to
    /// and including it. `index` must already be applied.
    pub fn compact(&self, index: u64, data: Vec<u8>) -> Result<()> {
        let mut core = self.wl();
        core.snapshot_wanted = false;
        if index < core.first_index() {
            return Ok(());
        }
        if index > core.last_index() {
            return Err(Error::Internal(format!(
                "cannot compact to {} past last index {}",
                index,
                core.last_index()
            )));
        }

        let offset = (index - core.first_index()) as usize;
        let mut snapshot = Snapshot::default();
        snapshot.data = data.into();
        let meta = snapshot.mut_metadata();
        meta.index = index;
        meta.term = core.entries[offset].term;
        meta.set_conf_state(core.conf_state.clone());

        core.snapshot = snapshot;
        core.entries.drain(..=offset);
        core.save_snapshot()?;
        core.rewrite_log()
    }

    /// Whether raft asked for a snapshot this store could not serve.
    pub fn snapshot_wanted(&self) -> bool {
        self.rl().snapshot_wanted
    }

    fn rl(&self) -> RwLockReadGuard<'_, Core> {
        self.core.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn wl(&self) -> RwLockWriteGuard<'_, Core> {
        self.core.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Core {
    fn first_index(&self) -> u64 {
        self.snapshot.get_metadata().index + 1
    }

    fn last_index(&self) -> u64 {
        match self.entries.last() {
            Some(entry) => entry.index,
            None => self.snapshot.get_metadata().index,
        }
    }

    fn write_entries(&mut self, entries: &[Entry]) -> Result<()> {
        for entry in entries {
            self.log.write_all(&frame(entry)?)?;
        }
        self.log.flush()?;
        if self.sync_policy == SyncPolicy::Always {
            self.log.get_ref().sync_data()?;
        }
        Ok(())
    }

    fn save_state(&self) -> Result<()> {
        let mut bytes = frame(&self.hard_state)?;
        bytes.extend(frame(&self.conf_state)?);
        replace_file(&self.dir.join(STATE_FILE), &bytes, self.sync_policy)
    }

    fn save_snapshot(&self) -> Result<()> {
        replace_file(
            &self.dir.join(SNAPSHOT_FILE),
            &frame(&self.snapshot)?,
            self.sync_policy,
        )
    }

    /// Rewrite `entries.log` from memory and reopen it for appending.
    fn rewrite_log(&mut self) -> Result<()> {
        let mut bytes = Vec::new();
        for entry in &self.entries {
            bytes.extend(frame(entry)?);
        }
        let path = self.dir.join(ENTRIES_FILE);
        replace_file(&path, &bytes, self.sync_policy)?;

        let stale = std::mem::replace(&mut self.log, BufWriter::new(open_log(&path)?));
        // the old handle points at the replaced file; nothing buffered in it is wanted
        let _ = stale.into_parts();
        Ok(())
    }
}

impl Storage for LogStore {
    fn initial_state(&self) -> raft::Result<RaftState> {
        let core = self.rl();
        Ok(RaftState::new(
            core.hard_state.clone(),
            core.conf_state.clone(),
        ))
    }

    fn entries(
        &self,
        low: u64,
        high: u64,
        max_size: impl Into<Option<u64>>,
        _context: GetEntriesContext,
    ) -> raft::Result<Vec<Entry>> {
        let core = self.rl();
        let first = core.first_index();
        if low < first {
            return Err(raft::Error::Store(StorageError::Compacted));
        }
        if high > core.last_index() + 1 || low > high {
            return Err(raft::Error::Store(StorageError::Unavailable));
        }
        let mut entries = core.entries[(low - first) as usize..(high - first) as usize].to_vec();
        limit_size(&mut entries, max_size.into());
        Ok(entries)
    }

    fn term(&self, idx: u64) -> raft::Result<u64> {
        let core = self.rl();
        let meta = core.snapshot.get_metadata();
        if idx == meta.index {
            return Ok(meta.term);
        }
        if idx < core.first_index() {
            return Err(raft::Error::Store(StorageError::Compacted));
        }
        if idx > core.last_index() {
            return Err(raft::Error::Store(StorageError::Unavailable));
        }
        Ok(core.entries[(idx - core.first_index()) as usize].term)
    }

    fn first_index(&self) -> raft::Result<u64> {
        Ok(self.rl().first_index())
    }

    fn last_index(&self) -> raft::Result<u64> {
        Ok(self.rl().last_index())
    }

    fn snapshot(&self, request_index: u64, to: u64) -> raft::Result<Snapshot> {
        let mut core = self.wl();
        let meta = core.snapshot.get_metadata();
        let cs = meta.get_conf_state();
        let covers_peer = cs.get_voters().contains(&to) || cs.get_learners().contains(&to);
        if meta.index > 0 && meta.index >= request_index && covers_peer {
            return Ok(core.snapshot.clone());
        }
        core.snapshot_wanted = true;
        Err(raft::Error::Store(
            StorageError::SnapshotTemporarilyUnavailable,
        ))
    }
}

fn open_log(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn frame(message: &impl PbMessage) -> Result<Vec<u8>> {
    let body = message.write_to_bytes()?;
    let len = u32::try_from(body.len())
        .map_err(|_| Error::Encoding(format!("raft record of {} bytes is too large", body.len())))?;
    let mut out = Vec::with_capacity(HEADER_LEN as usize + body.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&crc32(&body).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

fn parse<M: PbMessage + Default>(body: &[u8]) -> Result<M> {
    let mut message = M::default();
    message.merge_from_bytes(body)?;
    Ok(message)
}

/// Valid frame bodies in `path`, and the length of the prefix holding them.
///
/// Reading stops at the first torn or corrupt frame.
fn read_frames(path: &Path) -> Result<(Vec<Vec<u8>>, u64)> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut frames = Vec::new();
    let mut good = 0u64;

    while good + HEADER_LEN <= file_len {
        let mut header = [0u8; HEADER_LEN as usize];
        reader.read_exact(&mut header)?;
        let mut len = [0u8; 4];
        let mut crc = [0u8; 4];
        len.copy_from_slice(&header[..4]);
        crc.copy_from_slice(&header[4..]);
        let len = u32::from_le_bytes(len) as u64;
        if good + HEADER_LEN + len > file_len {
            break;
        }

        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body)?;
        if crc32(&body) != u32::from_le_bytes(crc) {
            warn!("Checksum mismatch in {:?} at offset {}", path, good);
            break;
        }
        frames.push(body);
        good += HEADER_LEN + len;
    }
    Ok((frames, good))
}

fn replace_file(path: &Path, bytes: &[u8], sync_policy: SyncPolicy) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        if sync_policy == SyncPolicy::Always {
            file.sync_data()?;
        }
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
