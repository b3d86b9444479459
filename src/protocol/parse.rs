//! Positional argument cursor over an array frame

use crate::common::{Error, Result};
use crate::protocol::Frame;
use bytes::Bytes;
use std::vec;

/// Consumes the elements of a request array left to right.
#[derive(Debug)]
pub struct Parse {
    parts: vec::IntoIter<Frame>,
}

impl Parse {
    /// Fails unless `frame` is an array.
    pub fn new(frame: Frame) -> Result<Parse> {
        match frame {
            Frame::Array(items) => Ok(Parse {
                parts: items.into_iter(),
            }),
            other => Err(Error::Protocol(format!("expected array, got {:?}", other))),
        }
    }

    fn next(&mut self) -> Result<Frame> {
        self.parts
            .next()
            .ok_or_else(|| Error::Protocol("end of frame".into()))
    }

    /// Next element as a UTF-8 string (simple or bulk).
    pub fn next_string(&mut self) -> Result<String> {
        match self.next()? {
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(data) => String::from_utf8(data.to_vec())
                .map_err(|_| Error::Protocol("invalid string".into())),
            other => Err(Error::Protocol(format!(
                "expected simple frame or bulk frame, got {:?}",
                other
            ))),
        }
    }

    /// Next element as raw bytes.
    pub fn next_bytes(&mut self) -> Result<Bytes> {
        match self.next()? {
            Frame::Simple(s) => Ok(Bytes::from(s.into_bytes())),
            Frame::Bulk(data) => Ok(data),
            other => Err(Error::Protocol(format!(
                "expected simple frame or bulk frame, got {:?}",
                other
            ))),
        }
    }

    /// Ensures there are no more elements.
    pub fn finish(&mut self) -> Result<()> {
        if self.parts.next().is_none() {
            Ok(())
        } else {
            Err(Error::Protocol(
                "expected end of frame, but there was more".into(),
            ))
        }
    }
}
