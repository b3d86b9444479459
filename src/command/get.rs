use crate::protocol::{Frame, Parse};
use crate::storage::KvsEngine;
use crate::Result;
use bytes::Bytes;

/// Read the value of `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Get {
    key: String,
}

impl Get {
    pub fn new(key: impl ToString) -> Get {
        Get {
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn parse_frames(parse: &mut Parse) -> Result<Get> {
        let key = parse.next_string()?;
        Ok(Get { key })
    }

    /// Responds with the value as a bulk string, or null when absent.
    pub fn apply(self, db: &dyn KvsEngine) -> Frame {
        match db.get(&self.key) {
            Ok(value) => Frame::Bulk(Bytes::from(value.into_bytes())),
            Err(e) if e.is_key_not_found() => Frame::Null,
            Err(e) => Frame::Error(e.to_string()),
        }
    }

    pub fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(super::GET);
        frame.push_bulk(self.key.into_bytes());
        frame
    }
}
