use crate::protocol::{Frame, Parse};
use crate::storage::KvsEngine;
use crate::Result;
use tracing::debug;

/// Store `value` under `key`, replacing any previous value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Set {
    key: String,
    value: String,
}

impl Set {
    pub fn new(key: impl ToString, value: impl ToString) -> Set {
        Set {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Parse the arguments following `SET`: `SET key value`.
    pub(crate) fn parse_frames(parse: &mut Parse) -> Result<Set> {
        let key = parse.next_string()?;
        let value = parse.next_string()?;
        Ok(Set { key, value })
    }

    /// Responds with `+OK`, or an error frame if the write failed.
    pub fn apply(self, db: &dyn KvsEngine) -> Frame {
        debug!(key = %self.key, "apply SET");
        match db.set(self.key, self.value) {
            Ok(()) => Frame::Simple("OK".to_string()),
            Err(e) => Frame::Error(e.to_string()),
        }
    }

    pub fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(super::SET);
        frame.push_bulk(self.key.into_bytes());
        frame.push_bulk(self.value.into_bytes());
        frame
    }
}
