use crate::protocol::{Frame, Parse};
use crate::storage::KvsEngine;
use crate::Result;
use tracing::debug;

/// Remove `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    key: String,
}

impl Delete {
    pub fn new(key: impl ToString) -> Delete {
        Delete {
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn parse_frames(parse: &mut Parse) -> Result<Delete> {
        let key = parse.next_string()?;
        Ok(Delete { key })
    }

    /// Responds with the number of keys removed: `:1`, or `:0` when the key
    /// did not exist.
    pub fn apply(self, db: &dyn KvsEngine) -> Frame {
        debug!(key = %self.key, "apply DEL");
        match db.remove(&self.key) {
            Ok(()) => Frame::Integer(1),
            Err(e) if e.is_key_not_found() => Frame::Integer(0),
            Err(e) => Frame::Error(e.to_string()),
        }
    }

    pub fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(super::DELETE);
        frame.push_bulk(self.key.into_bytes());
        frame
    }
}
