//! Replication bridge
//!
//! Decides, per command, whether it is served locally, proposed to the
//! replicated log, or relayed to the leader:
//!
//! - `GET` reads the local store and may observe slightly stale data on a
//!   follower.
//! - `SET`/`DEL` are proposed on the leader and answered with the frame the
//!   state machine produced when the entry committed. Followers forward the
//!   original request one hop to the leader.
//! - `member add|remove` are membership changes on the leader (forwarded
//!   otherwise); `member list` is answered locally.
//! - `RAFT` messages are fed to the consensus module and never answered.

pub mod forward;
pub mod provision;
pub mod state_machine;

pub use provision::{LocalProvisioner, Provision};
pub use state_machine::KvStateMachine;

use crate::command::{Command, Member, MemberOp};
use crate::common::{is_listening, is_loopback};
use crate::consensus::Consensus;
use crate::protocol::Frame;
use crate::storage::KvsEngine;
use crate::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long to probe a loopback address before provisioning a member there.
const LISTEN_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

pub struct Bridge<C> {
    consensus: Arc<C>,
    db: Arc<dyn KvsEngine>,
    provision: Option<Arc<dyn Provision>>,
    timeout: Duration,
}

impl<C> Bridge<C>
where
    C: Consensus<Response = Frame>,
{
    pub fn new(consensus: Arc<C>, db: Arc<dyn KvsEngine>, timeout: Duration) -> Self {
        Self {
            consensus,
            db,
            provision: None,
            timeout,
        }
    }

    pub fn with_provision(mut self, provision: Arc<dyn Provision>) -> Self {
        self.provision = Some(provision);
        self
    }

    pub fn consensus(&self) -> &Arc<C> {
        &self.consensus
    }

    /// Execute `command` and produce its response. `None` means the command
    /// expects no answer.
    pub async fn dispatch(&self, command: Command) -> Option<Frame> {
        match command {
            Command::Get(cmd) => Some(cmd.apply(self.db.as_ref())),
            cmd @ (Command::Set(_) | Command::Delete(_)) => Some(self.replicate(cmd).await),
            Command::Member(cmd) => Some(self.member(cmd).await),
            Command::Peer(msg) => {
                if let Err(e) = self.consensus.step(msg.payload()) {
                    debug!(error = %e, "Dropped peer message");
                }
                None
            }
        }
    }

    async fn replicate(&self, command: Command) -> Frame {
        if !self.consensus.is_leader() {
            return self.forward(command).await;
        }

        let entry = command.into_frame().encode().to_vec();
        match self.consensus.propose(entry, self.timeout).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Proposal failed");
                Frame::Error(e.to_string())
            }
        }
    }

    async fn forward(&self, command: Command) -> Frame {
        let Some(leader) = self.consensus.current_leader() else {
            return Frame::Error(Error::NoLeader.to_string());
        };
        match forward::forward(&leader, command.into_frame()).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Forwarding failed");
                Frame::Error(e.to_string())
            }
        }
    }

    async fn member(&self, cmd: Member) -> Frame {
        match cmd.op() {
            MemberOp::List => Frame::Simple(self.listing()),
            MemberOp::Add | MemberOp::Remove if !self.consensus.is_leader() => {
                self.forward(Command::Member(cmd)).await
            }
            MemberOp::Add => self.add_member(&cmd).await,
            MemberOp::Remove => self.remove_member(&cmd).await,
        }
    }

    async fn add_member(&self, cmd: &Member) -> Frame {
        let id = match cmd.node_id() {
            Ok(id) => id,
            Err(e) => return Frame::Error(e.to_string()),
        };
        let address = cmd.address();
        if address.is_empty() {
            return Frame::Error("member add requires an address".into());
        }

        if let Some(provision) = &self.provision {
            if is_loopback(address) && !is_listening(address, LISTEN_PROBE_TIMEOUT) {
                if let Err(e) = provision.provision(id, address) {
                    warn!(node = id, %address, error = %e, "Provisioning failed");
                    return Frame::Error(e.to_string());
                }
            }
        }

        match self.consensus.add_voter(id, address.to_string()).await {
            Ok(()) => {
                info!(node = id, %address, "Voter added");
                Frame::Simple("OK".into())
            }
            Err(e) => Frame::Error(e.to_string()),
        }
    }

    async fn remove_member(&self, cmd: &Member) -> Frame {
        let id = match cmd.node_id() {
            Ok(id) => id,
            Err(e) => return Frame::Error(e.to_string()),
        };
        match self.consensus.remove_server(id).await {
            Ok(()) => {
                info!(node = id, "Server removed");
                if let Some(provision) = &self.provision {
                    provision.release(id);
                }
                Frame::Simple("OK".into())
            }
            Err(e) => Frame::Error(e.to_string()),
        }
    }

    fn listing(&self) -> String {
        self.consensus
            .list_servers()
            .iter()
            .map(|server| {
                format!(
                    "id={} address={} suffrage=voter isLeader={}",
                    server.id, server.address, server.is_leader
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
