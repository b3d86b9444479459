//! Raft worker thread
//!
//! `RawNode` is not `Send`-friendly to share, so a single thread owns it and
//! everything else talks to it through a channel. Callers that need an
//! answer pass a oneshot sender and await it from async code.

use super::node::{decode_message, MemberChange, RaftNode, Responder};
use super::transport::Transport;
use super::{Consensus, Members, ServerInfo, StateMachine, Status};
use crate::common::RaftConfig;
use crate::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use raft::prelude::Message;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// Upper bound on requests handled between two `Ready` rounds.
const MAX_BATCH: usize = 256;

enum Request<R> {
    Propose {
        data: Vec<u8>,
        respond_to: Responder<R>,
    },
    Member {
        change: MemberChange,
        respond_to: Responder<()>,
    },
    Step(Message),
    Campaign,
    Shutdown,
}

/// Handle to a running raft worker. Cheap to share behind an `Arc`.
pub struct RaftHandle<R> {
    id: u64,
    requests: Sender<Request<R>>,
    status: Arc<RwLock<Status>>,
    members: Members,
    timeout: Duration,
}

impl<R: Send + 'static> RaftHandle<R> {
    /// Move `node` onto its own thread and start ticking.
    ///
    /// With `campaign` set the node starts an election immediately instead
    /// of waiting for its election timeout.
    pub fn start<S>(
        node: RaftNode<S>,
        transport: Transport,
        members: Members,
        config: &RaftConfig,
        campaign: bool,
    ) -> Result<Self>
    where
        S: StateMachine<Response = R>,
    {
        let id = node.id();
        let (tx, rx) = unbounded();
        let status = node.shared_status();

        if campaign {
            let _ = tx.send(Request::Campaign);
        }

        let worker = Worker {
            node,
            requests: rx,
            transport,
            tick_interval: config.tick_interval(),
        };
        thread::Builder::new()
            .name(format!("raft-{}", id))
            .spawn(move || worker.run())?;

        info!(node = id, campaign, "Raft worker started");

        Ok(Self {
            id,
            requests: tx,
            status,
            members,
            timeout: config.proposal_timeout(),
        })
    }

    pub fn status(&self) -> Status {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask the worker to stop. Pending proposals are dropped.
    pub fn shutdown(&self) {
        let _ = self.requests.send(Request::Shutdown);
    }

    fn send(&self, request: Request<R>) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| Error::Internal("raft worker stopped".into()))
    }

    async fn wait<T>(rx: oneshot::Receiver<Result<T>>, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Replication("proposal dropped".into())),
            Err(_) => Err(Error::ConsensusTimeout(timeout)),
        }
    }
}

impl<R> Drop for RaftHandle<R> {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Shutdown);
    }
}

impl<R: Send + 'static> Consensus for RaftHandle<R> {
    type Response = R;

    fn id(&self) -> u64 {
        self.id
    }

    async fn propose(&self, entry: Vec<u8>, timeout: Duration) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Propose {
            data: entry,
            respond_to: tx,
        })?;
        Self::wait(rx, timeout).await
    }

    fn step(&self, message: &[u8]) -> Result<()> {
        let msg = decode_message(message)?;
        self.send(Request::Step(msg))
    }

    fn is_leader(&self) -> bool {
        self.status().is_leader
    }

    fn current_leader(&self) -> Option<String> {
        match self.status().leader_id {
            0 => None,
            leader => self.members.address(leader),
        }
    }

    async fn add_voter(&self, id: u64, address: String) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Member {
            change: MemberChange::Add { id, address },
            respond_to: tx,
        })?;
        Self::wait(rx, self.timeout).await
    }

    async fn remove_server(&self, id: u64) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Member {
            change: MemberChange::Remove { id },
            respond_to: tx,
        })?;
        Self::wait(rx, self.timeout).await
    }

    fn list_servers(&self) -> Vec<ServerInfo> {
        let status = self.status();
        let mut voters = status.voters;
        voters.sort_unstable();
        voters
            .into_iter()
            .map(|id| ServerInfo {
                id,
                address: self.members.address(id).unwrap_or_default(),
                is_leader: id == status.leader_id,
            })
            .collect()
    }
}

struct Worker<S: StateMachine> {
    node: RaftNode<S>,
    requests: Receiver<Request<S::Response>>,
    transport: Transport,
    tick_interval: Duration,
}

impl<S: StateMachine> Worker<S> {
    fn run(mut self) {
        let id = self.node.id();
        let mut last_tick = Instant::now();

        loop {
            let wait = self.tick_interval.saturating_sub(last_tick.elapsed());
            match self.requests.recv_timeout(wait) {
                Ok(request) => {
                    // drain whatever queued up behind it
                    let mut batch = vec![request];
                    batch.extend(self.requests.try_iter().take(MAX_BATCH));
                    let mut running = true;
                    for request in batch {
                        running &= self.handle(request);
                    }
                    if !running {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if last_tick.elapsed() >= self.tick_interval {
                self.node.tick();
                self.node.purge_abandoned();
                last_tick = Instant::now();
            }

            match self.node.poll_ready() {
                Ok(Some(messages)) => self.transport.send(messages),
                Ok(None) => {}
                Err(e) => error!(node = id, error = %e, "Failed to process raft ready"),
            }

            self.node.publish_status();
        }

        info!(node = id, "Raft worker stopped");
    }

    /// Returns false once asked to stop.
    fn handle(&mut self, request: Request<S::Response>) -> bool {
        match request {
            Request::Shutdown => return false,
            Request::Propose { data, respond_to } => self.node.propose(data, respond_to),
            Request::Member { change, respond_to } => {
                self.node.propose_member_change(change, respond_to)
            }
            Request::Step(msg) => {
                if let Err(e) = self.node.step(msg) {
                    debug!(node = self.node.id(), error = %e, "Dropped raft message");
                }
            }
            Request::Campaign => {
                if let Err(e) = self.node.campaign() {
                    error!(node = self.node.id(), error = %e, "Campaign failed");
                }
            }
        }
        true
    }
}
