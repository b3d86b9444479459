//! In-process member provisioning
//!
//! `member add` with a loopback address nobody listens on starts a fresh
//! member inside the current process before it is added to the cluster.

use crate::common::{Config, PeerConfig};
use crate::server::{Node, NodeHandle};
use crate::{Error, Result};
use std::sync::{Mutex, PoisonError};
use tracing::info;

pub trait Provision: Send + Sync + 'static {
    /// Start member `id` listening on `address`.
    fn provision(&self, id: u64, address: &str) -> Result<()>;

    /// Stop member `id` if this provisioner started it. Returns whether it did.
    fn release(&self, id: u64) -> bool;
}

/// Starts provisioned members next to the local node.
///
/// New members join with the cluster's bootstrap voters as their initial
/// configuration and keep running until they are released or the
/// provisioner is dropped.
pub struct LocalProvisioner {
    base: Config,
    bootstrap: Vec<PeerConfig>,
    nodes: Mutex<Vec<NodeHandle>>,
}

impl LocalProvisioner {
    pub fn new(base: Config, bootstrap: Vec<PeerConfig>) -> Self {
        Self {
            base,
            bootstrap,
            nodes: Mutex::new(Vec::new()),
        }
    }

    fn member_config(&self, id: u64, address: &str) -> Config {
        let mut config = self.base.clone();
        config.server.node_id = id;
        config.server.addr = address.to_string();
        config.server.data_dir = self.base.raft.provision_dir.join(format!("node{}", id));
        config.raft.peers = self
            .bootstrap
            .iter()
            .filter(|peer| peer.id != id)
            .cloned()
            .collect();
        config.raft.bootstrap = false;
        config.raft.join = true;
        config
    }

    pub fn provisioned(&self) -> usize {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Provision for LocalProvisioner {
    fn provision(&self, id: u64, address: &str) -> Result<()> {
        if self.bootstrap.iter().any(|peer| peer.id == id) {
            return Err(Error::InvalidConfig(format!(
                "node {} is a bootstrap member and cannot be provisioned",
                id
            )));
        }

        let config = self.member_config(id, address);
        info!(node = id, %address, data_dir = %config.server.data_dir.display(), "Provisioning member");
        let handle = Node::start(config)?;
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(())
    }

    fn release(&self, id: u64) -> bool {
        let handle = {
            let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
            match nodes.iter().position(|node| node.id() == id) {
                Some(pos) => nodes.remove(pos),
                None => return false,
            }
        };
        info!(node = id, address = handle.addr(), "Stopping provisioned member");
        handle.shutdown();
        true
    }
}
