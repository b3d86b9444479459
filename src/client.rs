//! Async client
//!
//! Used by the `raftkv` CLI and by non-leader nodes relaying writes to the
//! leader. One request is in flight at a time per client.

use crate::command::{Delete, Get, Member, MemberOp, Set};
use crate::protocol::{Connection, Frame};
use crate::{Error, Result};
use tracing::debug;

pub struct Client {
    connection: Connection,
}

impl Client {
    pub async fn connect(addr: &str) -> Result<Client> {
        let connection = Connection::connect(addr).await?;
        Ok(Client { connection })
    }

    /// Send a raw request frame and return whatever the server answered,
    /// Error frames included.
    pub async fn invoke(&mut self, frame: Frame) -> Result<Frame> {
        debug!(request = %frame, "invoke");
        self.connection.write_frame(&frame).await?;
        match self.connection.read_frame().await? {
            Some(response) => Ok(response),
            None => Err(Error::ConnectionFailed(
                "connection closed before a response was received".into(),
            )),
        }
    }

    pub async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match self.invoke(Set::new(key, value).into_frame()).await? {
            Frame::Simple(_) => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// `None` when the key does not exist.
    pub async fn get(&mut self, key: &str) -> Result<Option<String>> {
        match self.invoke(Get::new(key).into_frame()).await? {
            Frame::Bulk(data) => String::from_utf8(data.to_vec())
                .map(Some)
                .map_err(|e| Error::Encoding(e.to_string())),
            Frame::Null => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    /// Returns the number of keys removed.
    pub async fn del(&mut self, key: &str) -> Result<i64> {
        match self.invoke(Delete::new(key).into_frame()).await? {
            Frame::Integer(removed) => Ok(removed),
            other => Err(unexpected(other)),
        }
    }

    pub async fn member(&mut self, op: MemberOp, server_id: &str, address: &str) -> Result<String> {
        match self
            .invoke(Member::new(op, server_id, address).into_frame())
            .await?
        {
            Frame::Simple(text) => Ok(text),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(frame: Frame) -> Error {
    match frame {
        Frame::Error(msg) => Error::Remote(msg),
        other => Error::Protocol(format!("unexpected response {:?}", other)),
    }
}
