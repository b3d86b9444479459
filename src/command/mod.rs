//! Typed requests
//!
//! A request is an array of bulk strings whose first element names the
//! command (case-sensitive) and whose remaining elements are positional
//! arguments. Commands convert back into the same frame shape for
//! replication and for building client requests.

mod delete;
mod get;
mod member;
mod peer;
mod set;

pub use delete::Delete;
pub use get::Get;
pub use member::{Member, MemberOp};
pub use peer::PeerMessage;
pub use set::Set;

use crate::protocol::{Frame, Parse};
use crate::{Error, Result};

pub const SET: &str = "SET";
pub const GET: &str = "GET";
pub const DELETE: &str = "DEL";
pub const MEMBER: &str = "member";
pub const RAFT: &str = "RAFT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set(Set),
    Get(Get),
    Delete(Delete),
    Member(Member),
    Peer(PeerMessage),
}

impl Command {
    /// Parse a command from a received frame.
    ///
    /// Unknown names, missing arguments and extra arguments are protocol
    /// errors.
    pub fn from_frame(frame: Frame) -> Result<Command> {
        let mut parse = Parse::new(frame)?;
        let name = parse.next_string()?;

        let command = match name.as_str() {
            SET => Command::Set(Set::parse_frames(&mut parse)?),
            GET => Command::Get(Get::parse_frames(&mut parse)?),
            DELETE => Command::Delete(Delete::parse_frames(&mut parse)?),
            MEMBER => Command::Member(Member::parse_frames(&mut parse)?),
            RAFT => Command::Peer(PeerMessage::parse_frames(&mut parse)?),
            other => return Err(Error::Protocol(format!("unknown command {}", other))),
        };

        parse.finish()?;
        Ok(command)
    }

    pub fn into_frame(self) -> Frame {
        match self {
            Command::Set(cmd) => cmd.into_frame(),
            Command::Get(cmd) => cmd.into_frame(),
            Command::Delete(cmd) => cmd.into_frame(),
            Command::Member(cmd) => cmd.into_frame(),
            Command::Peer(cmd) => cmd.into_frame(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Set(_) => SET,
            Command::Get(_) => GET,
            Command::Delete(_) => DELETE,
            Command::Member(_) => MEMBER,
            Command::Peer(_) => RAFT,
        }
    }

    /// Does this command go through the replicated log?
    pub fn is_replicated(&self) -> bool {
        matches!(self, Command::Set(_) | Command::Delete(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KvsEngine, MemoryEngine};
    use bytes::Bytes;

    fn request(parts: &[&str]) -> Frame {
        let mut frame = Frame::array();
        for part in parts {
            frame.push_bulk(part.to_string().into_bytes());
        }
        frame
    }

    #[test]
    fn test_parse_each_command() {
        assert_eq!(
            Command::from_frame(request(&["SET", "name", "mars"])).unwrap(),
            Command::Set(Set::new("name", "mars"))
        );
        assert_eq!(
            Command::from_frame(request(&["GET", "name"])).unwrap(),
            Command::Get(Get::new("name"))
        );
        assert_eq!(
            Command::from_frame(request(&["DEL", "name"])).unwrap(),
            Command::Delete(Delete::new("name"))
        );
        assert_eq!(
            Command::from_frame(request(&["member", "add", "2", "127.0.0.1:2318"])).unwrap(),
            Command::Member(Member::add("2", "127.0.0.1:2318"))
        );
    }

    #[test]
    fn test_into_frame_inverts_parse() {
        let commands = vec![
            Command::Set(Set::new("k", "v")),
            Command::Get(Get::new("k")),
            Command::Delete(Delete::new("k")),
            Command::Member(Member::list()),
            Command::Peer(PeerMessage::new(Bytes::from_static(&[0, 159, 146, 150]))),
        ];
        for command in commands {
            let frame = command.clone().into_frame();
            assert_eq!(Command::from_frame(frame).unwrap(), command);
        }
    }

    #[test]
    fn test_protocol_errors() {
        // names are case-sensitive
        assert!(Command::from_frame(request(&["set", "k", "v"])).is_err());
        assert!(Command::from_frame(request(&["SET", "k"])).is_err());
        assert!(Command::from_frame(request(&["GET", "k", "extra"])).is_err());
        assert!(Command::from_frame(request(&["member", "promote", "", ""])).is_err());
        assert!(Command::from_frame(Frame::Simple("GET".into())).is_err());
    }

    #[test]
    fn test_apply_responses() {
        let db = MemoryEngine::new();

        assert_eq!(Set::new("k", "v").apply(&db), Frame::Simple("OK".into()));
        assert_eq!(
            Get::new("k").apply(&db),
            Frame::Bulk(Bytes::from_static(b"v"))
        );
        assert_eq!(Delete::new("k").apply(&db), Frame::Integer(1));
        assert_eq!(Delete::new("k").apply(&db), Frame::Integer(0));
        assert_eq!(Get::new("k").apply(&db), Frame::Null);
        assert!(db.get("k").is_err());
    }

    #[test]
    fn test_member_node_id() {
        assert_eq!(Member::remove("3").node_id().unwrap(), 3);
        assert!(Member::remove("0").node_id().is_err());
        assert!(Member::remove("node-a").node_id().is_err());
    }
}
