//! Wire frames and their codec
//!
//! Frame grammar:
//! ```text
//! +<text>\r\n                 simple string
//! -<text>\r\n                 error
//! :<decimal>\r\n              integer
//! $<len>\r\n<bytes>\r\n       bulk string
//! $-1\r\n                     null
//! *<count>\r\n<frames...>     array
//! ```
//!
//! Decoding is split into [`Frame::check`], which only moves a cursor and
//! reports [`FrameError::Incomplete`] when the buffer ends early, and
//! [`Frame::parse`], which materializes a frame from bytes that already
//! passed the check.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::io::Cursor;

/// Largest bulk payload accepted from the wire.
const MAX_BULK_LEN: u64 = 512 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough data is buffered to decode a whole frame
    #[error("stream ended early")]
    Incomplete,

    /// The bytes can never form a valid frame
    #[error("protocol error; {0}")]
    Invalid(String),
}

impl Frame {
    /// An empty array frame.
    pub fn array() -> Frame {
        Frame::Array(Vec::new())
    }

    /// Append a bulk string to an array frame.
    ///
    /// Has no effect on non-array frames.
    pub fn push_bulk(&mut self, bytes: impl Into<Bytes>) {
        if let Frame::Array(items) = self {
            items.push(Frame::Bulk(bytes.into()));
        }
    }

    pub fn push_int(&mut self, value: i64) {
        if let Frame::Array(items) = self {
            items.push(Frame::Integer(value));
        }
    }

    /// Checks if an entire frame can be decoded from `src`.
    ///
    /// On success the cursor is left just past the frame.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), FrameError> {
        match get_u8(src)? {
            b'+' | b'-' => {
                get_line(src)?;
                Ok(())
            }
            b':' => {
                get_decimal(src)?;
                Ok(())
            }
            b'$' => {
                if peek_u8(src)? == b'-' {
                    let line = get_line(src)?;
                    if line != b"-1" {
                        return Err(invalid_length(line));
                    }
                } else {
                    let len = get_length(src)?;
                    // payload + \r\n
                    skip(src, len + 2)?;
                    let end = src.position() as usize;
                    if &src.get_ref()[end - 2..end] != b"\r\n" {
                        return Err(FrameError::Invalid("bulk string not terminated".into()));
                    }
                }
                Ok(())
            }
            b'*' => {
                let count = get_length(src)?;
                for _ in 0..count {
                    Frame::check(src)?;
                }
                Ok(())
            }
            actual => Err(FrameError::Invalid(format!(
                "invalid frame type byte `{}`",
                actual
            ))),
        }
    }

    /// Materializes a frame from bytes that passed [`Frame::check`].
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, FrameError> {
        match get_u8(src)? {
            b'+' => Ok(Frame::Simple(get_text(src)?)),
            b'-' => Ok(Frame::Error(get_text(src)?)),
            b':' => Ok(Frame::Integer(get_decimal(src)?)),
            b'$' => {
                if peek_u8(src)? == b'-' {
                    let line = get_line(src)?;
                    if line != b"-1" {
                        return Err(invalid_length(line));
                    }
                    Ok(Frame::Null)
                } else {
                    let len = get_length(src)? as usize;
                    let n = len + 2;
                    if src.remaining() < n {
                        return Err(FrameError::Incomplete);
                    }
                    let data = Bytes::copy_from_slice(&src.chunk()[..len]);
                    skip(src, n as u64)?;
                    Ok(Frame::Bulk(data))
                }
            }
            b'*' => {
                let count = get_length(src)? as usize;
                let mut out = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    out.push(Frame::parse(src)?);
                }
                Ok(Frame::Array(out))
            }
            actual => Err(FrameError::Invalid(format!(
                "invalid frame type byte `{}`",
                actual
            ))),
        }
    }

    /// Decodes exactly one frame occupying all of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
        let mut cursor = Cursor::new(bytes);
        Frame::check(&mut cursor)?;
        let len = cursor.position() as usize;
        if len != bytes.len() {
            return Err(FrameError::Invalid(format!(
                "{} trailing bytes after frame",
                bytes.len() - len
            )));
        }
        cursor.set_position(0);
        Frame::parse(&mut cursor)
    }

    /// Serializes the frame into `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(text) => {
                dst.put_u8(b'+');
                put_line(dst, text);
            }
            Frame::Error(text) => {
                dst.put_u8(b'-');
                put_line(dst, text);
            }
            Frame::Integer(value) => {
                dst.put_u8(b':');
                put_decimal(dst, *value);
            }
            Frame::Bulk(data) => {
                dst.put_u8(b'$');
                put_decimal(dst, data.len() as i64);
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Null => dst.put_slice(b"$-1\r\n"),
            Frame::Array(items) => {
                dst.put_u8(b'*');
                put_decimal(dst, items.len() as i64);
                for item in items {
                    item.write_to(dst);
                }
            }
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.write_to(&mut dst);
        dst.freeze()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(text) => text.fmt(f),
            Frame::Error(text) => write!(f, "error: {}", text),
            Frame::Integer(value) => value.fmt(f),
            Frame::Bulk(data) => match std::str::from_utf8(data) {
                Ok(text) => text.fmt(f),
                Err(_) => write!(f, "{:?}", data),
            },
            Frame::Null => "(nil)".fmt(f),
            Frame::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    item.fmt(f)?;
                }
                Ok(())
            }
        }
    }
}

fn put_decimal(dst: &mut BytesMut, value: i64) {
    dst.put_slice(value.to_string().as_bytes());
    dst.put_slice(b"\r\n");
}

fn peek_u8(src: &mut Cursor<&[u8]>) -> Result<u8, FrameError> {
    if !src.has_remaining() {
        return Err(FrameError::Incomplete);
    }
    Ok(src.chunk()[0])
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, FrameError> {
    if !src.has_remaining() {
        return Err(FrameError::Incomplete);
    }
    Ok(src.get_u8())
}

fn skip(src: &mut Cursor<&[u8]>, n: u64) -> Result<(), FrameError> {
    if (src.remaining() as u64) < n {
        return Err(FrameError::Incomplete);
    }
    src.advance(n as usize);
    Ok(())
}

/// Reads up to the next `\r\n`, leaving the cursor after it.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], FrameError> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();
    if buf.len() < 2 {
        return Err(FrameError::Incomplete);
    }
    let end = buf.len() - 1;

    for i in start..end {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            src.set_position((i + 2) as u64);
            return Ok(&buf[start..i]);
        }
    }

    Err(FrameError::Incomplete)
}

fn get_text(src: &mut Cursor<&[u8]>) -> Result<String, FrameError> {
    let line = get_line(src)?;
    String::from_utf8(line.to_vec())
        .map_err(|_| FrameError::Invalid("frame text is not valid UTF-8".into()))
}

fn get_decimal(src: &mut Cursor<&[u8]>) -> Result<i64, FrameError> {
    let line = get_line(src)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| FrameError::Invalid("invalid frame format".into()))
}

/// A non-negative length prefix.
fn get_length(src: &mut Cursor<&[u8]>) -> Result<u64, FrameError> {
    let line = get_line(src)?;
    let len = std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| invalid_length(line))?;
    if len > MAX_BULK_LEN {
        return Err(FrameError::Invalid(format!("length {} exceeds limit", len)));
    }
    Ok(len)
}

/// Writes `text` as a single-line payload. A carriage return would let the
/// text end the line early, so each one becomes a space; bare `\n` is kept.
fn put_line(dst: &mut BytesMut, text: &str) {
    for &byte in text.as_bytes() {
        dst.put_u8(if byte == b'\r' { b' ' } else { byte });
    }
    dst.put_slice(b"\r\n");
}

fn invalid_length(line: &[u8]) -> FrameError {
    FrameError::Invalid(format!(
        "invalid length `{}`",
        String::from_utf8_lossy(line)
    ))
}
