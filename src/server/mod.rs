//! Node bootstrap and TCP listener
//!
//! A node is one cluster member: its storage engine, its raft worker and a
//! listener that serves clients and peers on the same port.

mod handler;

use crate::bridge::{Bridge, KvStateMachine, LocalProvisioner};
use crate::common::{Config, PeerConfig};
use crate::consensus::{Consensus, LogStore, Members, RaftHandle, RaftNode, Transport};
use crate::protocol::{Connection, Frame};
use crate::storage::{self, Db};
use crate::{Error, Result};
use handler::Handler;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, error};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Node;

impl Node {
    /// Bind `config.server.addr` and start serving on the current tokio
    /// runtime.
    pub fn start(config: Config) -> Result<NodeHandle> {
        let listener = std::net::TcpListener::bind(&config.server.addr)?;
        Node::with_listener(config, listener)
    }

    /// Start serving on an already bound listener.
    pub fn with_listener(mut config: Config, listener: std::net::TcpListener) -> Result<NodeHandle> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("node must start inside a tokio runtime: {}", e)))?;

        let id = config.server.node_id;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        if config.server.addr.ends_with(":0") {
            config.server.addr = local_addr.to_string();
        }
        let addr = config.server.addr.clone();

        tracing::info!("Starting node: {}", id);
        tracing::info!("  Address: {}", addr);
        tracing::info!("  Data dir: {}", config.server.data_dir.display());
        tracing::info!("  Engine: {:?}", config.server.engine);
        tracing::info!("  Peers: {}", config.raft.peers.len());

        let db: Arc<Db> = Arc::new(storage::open(&config)?);

        let bootstrap = bootstrap_peers(&config);
        let voters: Vec<u64> = bootstrap.iter().map(|peer| peer.id).collect();
        let members = Members::new(
            config
                .raft
                .peers
                .iter()
                .map(|peer| (peer.id, peer.addr.clone()))
                .chain(std::iter::once((id, addr.clone()))),
        );

        let log = LogStore::open(config.server.data_dir.join("raft"), config.storage.sync)?;
        let state_machine = KvStateMachine::new(db.clone());
        let node = RaftNode::new(id, &voters, &config.raft, log, state_machine, members.clone())?;
        let transport = Transport::new(id, members.clone(), runtime.clone());
        let consensus = Arc::new(RaftHandle::start(
            node,
            transport,
            members,
            &config.raft,
            config.raft.bootstrap,
        )?);

        let provisioner = LocalProvisioner::new(config.clone(), bootstrap);
        let bridge = Arc::new(
            Bridge::new(consensus.clone(), db.clone(), config.raft.proposal_timeout())
                .with_provision(Arc::new(provisioner)),
        );

        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(listener)?
        };
        let (shutdown, _) = broadcast::channel(1);
        runtime.spawn(serve(listener, bridge, shutdown.clone()));

        tracing::info!("Node {} ready (join: {})", id, config.raft.join);

        Ok(NodeHandle {
            id,
            addr,
            local_addr,
            consensus,
            db,
            shutdown,
        })
    }
}

/// The initial voter set: configured peers plus this node, or only the
/// peers when joining an existing cluster.
fn bootstrap_peers(config: &Config) -> Vec<PeerConfig> {
    let mut peers = config.raft.peers.clone();
    if !config.raft.join && !peers.iter().any(|peer| peer.id == config.server.node_id) {
        peers.push(PeerConfig {
            id: config.server.node_id,
            addr: config.server.addr.clone(),
        });
    }
    peers.sort_by_key(|peer| peer.id);
    peers
}

async fn serve<C>(listener: TcpListener, bridge: Arc<Bridge<C>>, shutdown: broadcast::Sender<()>)
where
    C: Consensus<Response = Frame>,
{
    let mut stop = shutdown.subscribe();
    loop {
        let (socket, peer) = tokio::select! {
            res = listener.accept() => match res {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
            _ = stop.recv() => break,
        };

        let _ = socket.set_nodelay(true);
        let mut handler = Handler {
            bridge: bridge.clone(),
            connection: Connection::new(socket),
            shutdown: shutdown.subscribe(),
        };
        tokio::spawn(async move {
            if let Err(e) = handler.run().await {
                debug!(%peer, error = %e, "Connection closed");
            }
        });
    }
    debug!("Listener stopped");
}

/// A running node. Dropping it stops the node.
pub struct NodeHandle {
    id: u64,
    addr: String,
    local_addr: SocketAddr,
    consensus: Arc<RaftHandle<Frame>>,
    db: Arc<Db>,
    shutdown: broadcast::Sender<()>,
}

impl NodeHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address advertised to clients and peers.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn consensus(&self) -> &Arc<RaftHandle<Frame>> {
        &self.consensus
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn is_leader(&self) -> bool {
        self.consensus.is_leader()
    }

    /// Stop accepting connections, close open ones and stop the raft worker.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
        self.consensus.shutdown();
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
