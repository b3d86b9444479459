//! Consensus module
//!
//! Leader election, log replication and membership changes come from the
//! `raft` crate. This module drives a `RawNode` on a dedicated worker thread
//! and exposes the small surface the replication bridge needs:
//!
//! - [`Consensus::propose`]: append an entry and wait for it to commit
//! - [`Consensus::is_leader`] / [`Consensus::current_leader`]
//! - [`Consensus::add_voter`] / [`Consensus::remove_server`] / [`Consensus::list_servers`]
//!
//! Committed entries are handed to a [`StateMachine`] exactly once, in log
//! order, and the state machine's response is returned to the proposer.

pub mod node;
pub mod runtime;
pub mod store;
pub mod transport;

pub use node::RaftNode;
pub use runtime::RaftHandle;
pub use store::LogStore;
pub use transport::Transport;

use crate::Result;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Receives committed log entries.
pub trait StateMachine: Send + Sync + 'static {
    /// Opaque result handed back to the proposer.
    type Response: Send + 'static;

    fn apply(&self, index: u64, entry: &[u8]) -> Self::Response;

    /// Serialize everything applied so far.
    fn snapshot(&self) -> Result<Vec<u8>>;

    /// Replace the current state with one produced by [`StateMachine::snapshot`].
    fn restore(&self, data: &[u8]) -> Result<()>;
}

/// A member as reported by [`Consensus::list_servers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub id: u64,
    pub address: String,
    pub is_leader: bool,
}

/// Replicated log as seen by the bridge.
pub trait Consensus: Send + Sync + 'static {
    type Response: Send + 'static;

    /// This member's id.
    fn id(&self) -> u64;

    /// Append `entry` and wait up to `timeout` for it to commit and apply.
    fn propose(
        &self,
        entry: Vec<u8>,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Response>> + Send;

    /// Feed an encoded message received from another member.
    fn step(&self, message: &[u8]) -> Result<()>;

    fn is_leader(&self) -> bool;

    /// Address of the current leader, if one is known.
    fn current_leader(&self) -> Option<String>;

    fn add_voter(&self, id: u64, address: String) -> impl Future<Output = Result<()>> + Send;

    fn remove_server(&self, id: u64) -> impl Future<Output = Result<()>> + Send;

    fn list_servers(&self) -> Vec<ServerInfo>;
}

/// Member id to address directory, shared by the worker and the transport.
///
/// Seeded from configuration and updated whenever a membership change is
/// applied.
#[derive(Debug, Clone, Default)]
pub struct Members {
    inner: Arc<RwLock<BTreeMap<u64, String>>>,
}

impl Members {
    pub fn new(initial: impl IntoIterator<Item = (u64, String)>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial.into_iter().collect())),
        }
    }

    pub fn insert(&self, id: u64, address: String) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, address);
    }

    pub fn remove(&self, id: u64) -> Option<String> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn address(&self, id: u64) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<u64, String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the whole directory.
    pub fn replace(&self, members: BTreeMap<u64, String>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = members;
    }
}

/// Point-in-time view of the local node, published by the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub id: u64,
    pub leader_id: u64,
    pub term: u64,
    pub is_leader: bool,
    pub voters: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_directory() {
        let members = Members::new([(1, "127.0.0.1:2317".to_string())]);
        let shared = members.clone();
        shared.insert(2, "127.0.0.1:2318".into());

        assert_eq!(members.address(2).as_deref(), Some("127.0.0.1:2318"));
        assert_eq!(members.remove(1).as_deref(), Some("127.0.0.1:2317"));
        assert_eq!(members.snapshot().len(), 1);

        members.replace(BTreeMap::from([(3, "127.0.0.1:2319".to_string())]));
        assert_eq!(shared.address(2), None);
        assert_eq!(shared.address(3).as_deref(), Some("127.0.0.1:2319"));
    }
}
