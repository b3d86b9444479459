use crate::protocol::{Frame, Parse};
use crate::Result;
use bytes::Bytes;

/// An encoded consensus message from another member.
///
/// Travels on the client port and is never answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    payload: Bytes,
}

impl PeerMessage {
    pub fn new(payload: impl Into<Bytes>) -> PeerMessage {
        PeerMessage {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub(crate) fn parse_frames(parse: &mut Parse) -> Result<PeerMessage> {
        let payload = parse.next_bytes()?;
        Ok(PeerMessage { payload })
    }

    pub fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(super::RAFT);
        frame.push_bulk(self.payload);
        frame
    }
}
