//! Generation-numbered segment files (`<gen>.log`)

use crate::common::{Result, SyncPolicy};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const SEGMENT_EXT: &str = "log";

pub fn segment_path(dir: &Path, gen: u64) -> PathBuf {
    dir.join(format!("{}.{}", gen, SEGMENT_EXT))
}

/// Generations present in `dir`, ascending.
///
/// Files that do not look like `<number>.log` are ignored.
pub fn list_generations(dir: &Path) -> Result<Vec<u64>> {
    let mut gens: Vec<u64> = fs::read_dir(dir)?
        .flat_map(|entry| -> Result<_> { Ok(entry?.path()) })
        .filter(|path| path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(SEGMENT_EXT))
        .filter_map(|path| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
        })
        .collect();
    gens.sort_unstable();
    Ok(gens)
}

/// Random-access reader over a (possibly still growing) segment.
pub struct SegmentReader {
    reader: BufReader<File>,
}

impl SegmentReader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
        })
    }

    /// Read exactly `len` bytes starting at `offset`.
    pub fn read_at(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len as usize];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Copy `len` bytes starting at `offset` into `dst`.
    pub fn copy_to<W: Write>(&mut self, offset: u64, len: u64, dst: &mut W) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        let copied = io::copy(&mut (&mut self.reader).take(len), dst)?;
        if copied != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("segment ended after {} of {} bytes", copied, len),
            )
            .into());
        }
        Ok(())
    }

    /// Rewind for a sequential scan from the start.
    pub fn rewind(&mut self) -> Result<&mut BufReader<File>> {
        self.reader.seek(SeekFrom::Start(0))?;
        Ok(&mut self.reader)
    }
}

/// Append-only writer that tracks its position.
///
/// An append that fails part way is rolled back, so the file and `pos` only
/// ever cover whole records.
pub struct SegmentWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    pos: u64,
    sync_policy: SyncPolicy,
}

impl SegmentWriter {
    /// Create (or reopen for append) the segment for `gen`.
    pub fn create(dir: &Path, gen: u64, sync_policy: SyncPolicy) -> Result<Self> {
        let path = segment_path(dir, gen);
        let file = open_append(&path)?;
        let pos = file.metadata()?.len();
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            pos,
            sync_policy,
        })
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Append bytes durably, returning the offset they start at.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.pos;
        if let Err(e) = self.write_and_commit(bytes) {
            if let Err(rollback) = self.rollback(offset) {
                warn!("Could not roll back {:?} to {}: {}", self.path, offset, rollback);
            }
            return Err(e);
        }
        self.pos = offset + bytes.len() as u64;
        Ok(offset)
    }

    fn write_and_commit(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.commit()
    }

    /// Drop anything buffered and cut the file back to `offset`.
    pub fn rollback(&mut self, offset: u64) -> Result<()> {
        let fresh = BufWriter::new(open_append(&self.path)?);
        let (file, _discarded) = std::mem::replace(&mut self.writer, fresh).into_parts();
        file.set_len(offset)?;
        self.pos = offset;
        Ok(())
    }

    /// Flush buffered bytes, and fsync under [`SyncPolicy::Always`].
    pub fn commit(&mut self) -> Result<()> {
        self.writer.flush()?;
        if self.sync_policy == SyncPolicy::Always {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for SegmentWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_list_generations_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        for name in ["10.log", "2.log", "notes.txt", "x.log", "3.log"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(list_generations(dir.path()).unwrap(), vec![2, 3, 10]);
    }

    #[test]
    fn test_append_then_read_back() {
        let dir = tempdir().unwrap();
        let mut writer = SegmentWriter::create(dir.path(), 1, SyncPolicy::Flush).unwrap();
        assert_eq!(writer.append(b"hello").unwrap(), 0);
        assert_eq!(writer.append(b"world").unwrap(), 5);

        let mut reader = SegmentReader::open(&segment_path(dir.path(), 1)).unwrap();
        assert_eq!(reader.read_at(5, 5).unwrap(), b"world");

        let mut out = Vec::new();
        reader.copy_to(2, 6, &mut out).unwrap();
        assert_eq!(out, b"llowor");
        assert!(reader.copy_to(8, 10, &mut Vec::new()).is_err());
    }

    #[test]
    fn test_rollback_discards_partial_write() {
        let dir = tempdir().unwrap();
        let mut writer = SegmentWriter::create(dir.path(), 1, SyncPolicy::Flush).unwrap();
        let offset = writer.append(b"kept").unwrap();
        assert_eq!(offset, 0);

        // half a record reaches the file, the rest is still buffered
        writer.write_all(b"tor").unwrap();
        writer.flush().unwrap();
        writer.write_all(b"n").unwrap();
        writer.rollback(4).unwrap();
        assert_eq!(writer.pos(), 4);

        assert_eq!(writer.append(b"next").unwrap(), 4);
        let path = segment_path(dir.path(), 1);
        assert_eq!(fs::read(&path).unwrap(), b"keptnext");

        let mut reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.read_at(4, 4).unwrap(), b"next");
    }
}
