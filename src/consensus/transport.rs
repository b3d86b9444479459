//! Outbound raft traffic
//!
//! Messages are wrapped in a `RAFT` request and written to the destination's
//! client port. Each destination gets its own task and lazily opened
//! connection; anything that cannot be delivered is dropped and left to raft's
//! own retransmission.

use super::node::encode_message;
use super::Members;
use crate::command::PeerMessage;
use crate::protocol::Connection;
use bytes::Bytes;
use raft::prelude::Message;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF: Duration = Duration::from_millis(200);

pub struct Transport {
    id: u64,
    runtime: Handle,
    members: Members,
    links: Mutex<HashMap<u64, UnboundedSender<Bytes>>>,
}

impl Transport {
    /// `runtime` hosts the per-peer tasks; `send` may be called from any
    /// thread.
    pub fn new(id: u64, members: Members, runtime: Handle) -> Self {
        Self {
            id,
            runtime,
            members,
            links: Mutex::new(HashMap::new()),
        }
    }

    pub fn send(&self, messages: Vec<Message>) {
        for msg in messages {
            let to = msg.to;
            if to == self.id {
                continue;
            }

            let payload = match encode_message(&msg) {
                Ok(bytes) => Bytes::from(bytes),
                Err(e) => {
                    warn!(to, error = %e, "Failed to encode raft message");
                    continue;
                }
            };

            let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
            let link = links.entry(to).or_insert_with(|| self.spawn_link(to));
            if link.send(payload).is_err() {
                links.remove(&to);
            }
        }
    }

    fn spawn_link(&self, to: u64) -> UnboundedSender<Bytes> {
        let (tx, rx) = unbounded_channel();
        self.runtime
            .spawn(run_link(self.id, to, self.members.clone(), rx));
        tx
    }
}

async fn run_link(id: u64, to: u64, members: Members, mut rx: UnboundedReceiver<Bytes>) {
    let mut conn: Option<Connection> = None;
    let mut retry_at = Instant::now();

    while let Some(payload) = rx.recv().await {
        if conn.is_none() {
            if Instant::now() < retry_at {
                continue;
            }
            let Some(addr) = members.address(to) else {
                debug!(node = id, to, "No address for peer, dropping message");
                continue;
            };
            match tokio::time::timeout(CONNECT_TIMEOUT, Connection::connect(&addr)).await {
                Ok(Ok(c)) => {
                    debug!(node = id, to, %addr, "Connected to peer");
                    conn = Some(c);
                }
                Ok(Err(e)) => {
                    debug!(node = id, to, %addr, error = %e, "Peer unreachable");
                    retry_at = Instant::now() + RECONNECT_BACKOFF;
                    continue;
                }
                Err(_) => {
                    debug!(node = id, to, %addr, "Peer connect timed out");
                    retry_at = Instant::now() + RECONNECT_BACKOFF;
                    continue;
                }
            }
        }

        if let Some(c) = conn.as_mut() {
            let frame = PeerMessage::new(payload).into_frame();
            if let Err(e) = c.write_frame(&frame).await {
                debug!(node = id, to, error = %e, "Lost connection to peer");
                conn = None;
            }
        }
    }
}
