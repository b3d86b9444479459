//! On-disk record format
//!
//! Each record is a JSON body behind an 8-byte header:
//! `[BODY_LEN:4 LE][CRC32(body):4 LE][BODY]`. Index entries cover the whole
//! framed record so compaction can copy it byte for byte.

use crate::common::{crc32, Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{self, Read};

pub const HEADER_LEN: u64 = 8;

/// Largest body a record may carry. Writes above it are refused and a
/// header claiming more is treated as corrupt on replay.
pub const MAX_BODY_LEN: u32 = 512 * 1024 * 1024;

/// A logged mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Record {
    Set { key: String, value: String },
    Delete { key: String },
}

/// Outcome of reading the next record from a segment.
#[derive(Debug)]
pub enum Scan {
    /// A record and its framed length
    Record { record: Record, len: u64 },
    /// Clean end of segment
    End,
    /// Torn or corrupt tail; nothing after it can be trusted
    Corrupt(String),
}

impl Record {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Record::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Record::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Record::Set { key, .. } | Record::Delete { key } => key,
        }
    }

    /// Serialize with header.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(self)?;
        let len = check_body_len(body.len())?;
        let mut out = Vec::with_capacity(HEADER_LEN as usize + body.len());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&crc32(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode one framed record, verifying length and checksum.
    pub fn decode(framed: &[u8]) -> Result<Record> {
        if framed.len() < HEADER_LEN as usize {
            return Err(Error::Encoding("record shorter than header".into()));
        }
        let (header, body) = framed.split_at(HEADER_LEN as usize);
        let (len, expected) = parse_header(header);
        if len as usize != body.len() {
            return Err(Error::Encoding(format!(
                "record length {} does not match {} stored bytes",
                len,
                body.len()
            )));
        }
        let actual = crc32(body);
        if actual != expected {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
        Ok(serde_json::from_slice(body)?)
    }

    /// Read the next record from a sequential segment scan.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Scan> {
        let mut header = [0u8; HEADER_LEN as usize];
        match read_full(reader, &mut header)? {
            0 => return Ok(Scan::End),
            n if n < header.len() => {
                return Ok(Scan::Corrupt(format!("truncated header ({} bytes)", n)))
            }
            _ => {}
        }

        let (len, expected) = parse_header(&header);
        if len > MAX_BODY_LEN {
            return Ok(Scan::Corrupt(format!("implausible record length {}", len)));
        }
        let mut body = vec![0u8; len as usize];
        let n = read_full(reader, &mut body)?;
        if n < body.len() {
            return Ok(Scan::Corrupt(format!(
                "truncated body ({} of {} bytes)",
                n, len
            )));
        }

        let actual = crc32(&body);
        if actual != expected {
            return Ok(Scan::Corrupt(format!(
                "checksum mismatch: expected {:08x}, got {:08x}",
                expected, actual
            )));
        }

        match serde_json::from_slice(&body) {
            Ok(record) => Ok(Scan::Record {
                record,
                len: HEADER_LEN + len as u64,
            }),
            Err(e) => Ok(Scan::Corrupt(format!("undecodable record: {}", e))),
        }
    }
}

/// Body length as stored in the header, if it is within [`MAX_BODY_LEN`].
fn check_body_len(len: usize) -> Result<u32> {
    match u32::try_from(len) {
        Ok(len) if len <= MAX_BODY_LEN => Ok(len),
        _ => Err(Error::Encoding(format!(
            "record body of {} bytes exceeds the {} byte limit",
            len, MAX_BODY_LEN
        ))),
    }
}

fn parse_header(header: &[u8]) -> (u32, u32) {
    let mut len = [0u8; 4];
    let mut crc = [0u8; 4];
    len.copy_from_slice(&header[..4]);
    crc.copy_from_slice(&header[4..8]);
    (u32::from_le_bytes(len), u32::from_le_bytes(crc))
}

/// Like `read_exact`, but reports how many bytes were read before EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
