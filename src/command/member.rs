use crate::protocol::{Frame, Parse};
use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOp {
    Add,
    Remove,
    List,
}

impl MemberOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberOp::Add => "add",
            MemberOp::Remove => "remove",
            MemberOp::List => "list",
        }
    }
}

impl FromStr for MemberOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(MemberOp::Add),
            "remove" => Ok(MemberOp::Remove),
            "list" => Ok(MemberOp::List),
            other => Err(Error::Protocol(format!(
                "unknown member subcommand {}",
                other
            ))),
        }
    }
}

impl fmt::Display for MemberOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cluster membership administration.
///
/// Always carries three arguments on the wire; unused ones are empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    op: MemberOp,
    server_id: String,
    address: String,
}

impl Member {
    pub fn new(op: MemberOp, server_id: impl ToString, address: impl ToString) -> Member {
        Member {
            op,
            server_id: server_id.to_string(),
            address: address.to_string(),
        }
    }

    pub fn add(server_id: impl ToString, address: impl ToString) -> Member {
        Member::new(MemberOp::Add, server_id, address)
    }

    pub fn remove(server_id: impl ToString) -> Member {
        Member::new(MemberOp::Remove, server_id, "")
    }

    pub fn list() -> Member {
        Member::new(MemberOp::List, "", "")
    }

    pub fn op(&self) -> MemberOp {
        self.op
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// The server id as a raft node id.
    pub fn node_id(&self) -> Result<u64> {
        match self.server_id.parse::<u64>() {
            Ok(id) if id > 0 => Ok(id),
            _ => Err(Error::InvalidConfig(format!(
                "server id must be a positive integer, got {:?}",
                self.server_id
            ))),
        }
    }

    pub(crate) fn parse_frames(parse: &mut Parse) -> Result<Member> {
        let op = parse.next_string()?.parse()?;
        let server_id = parse.next_string()?;
        let address = parse.next_string()?;
        Ok(Member {
            op,
            server_id,
            address,
        })
    }

    pub fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(super::MEMBER);
        frame.push_bulk(self.op.as_str());
        frame.push_bulk(self.server_id.into_bytes());
        frame.push_bulk(self.address.into_bytes());
        frame
    }
}
