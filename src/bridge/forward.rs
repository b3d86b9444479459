//! Leader forwarding
//!
//! A single hop: the request frame goes to the leader over a fresh
//! connection and the leader's answer is relayed verbatim. If the leader
//! itself redirects, that answer is what the client sees.

use crate::client::Client;
use crate::protocol::Frame;
use crate::{Error, Result};
use tracing::debug;

pub async fn forward(leader: &str, frame: Frame) -> Result<Frame> {
    debug!(%leader, request = %frame, "Forwarding to leader");
    let relay = async {
        let mut client = Client::connect(leader).await?;
        client.invoke(frame).await
    };
    relay.await.map_err(|e| Error::Forwarding {
        leader: leader.to_string(),
        reason: e.to_string(),
    })
}
