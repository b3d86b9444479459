//! Raft node wrapper
//!
//! Owns a `RawNode` over the durable [`LogStore`] and turns committed entries
//! into state machine calls. Not thread-safe on its own: the runtime drives
//! it from a single worker thread.
//!
//! Once more than `snapshot_interval` applied entries sit in the log, the
//! state machine is snapshotted and the log is compacted up to the applied
//! index. A snapshot carries the member directory alongside the state
//! machine's bytes.

use super::{LogStore, Members, StateMachine, Status};
use crate::common::RaftConfig;
use crate::{Error, Result};
use protobuf::Message as PbMessage;
use raft::prelude::{
    ConfChange, ConfChangeType, Config as RawConfig, Entry, EntryType, Message, MessageType,
    RawNode, Snapshot,
};
use raft::{SnapshotStatus, StateRole, Storage};
use slog::{o, Logger};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Completion channel for a proposal.
pub type Responder<T> = oneshot::Sender<Result<T>>;

/// Role of the local node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Follower,
    Candidate,
    Leader,
}

impl From<StateRole> for Role {
    fn from(role: StateRole) -> Self {
        match role {
            StateRole::Leader => Role::Leader,
            StateRole::Candidate | StateRole::PreCandidate => Role::Candidate,
            StateRole::Follower => Role::Follower,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// A membership change to replicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberChange {
    Add { id: u64, address: String },
    Remove { id: u64 },
}

/// Identifies a proposal so the proposer can be found again when the entry
/// is applied. Stored in the entry context as two little-endian u64s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposalId {
    pub node: u64,
    pub seq: u64,
}

impl ProposalId {
    pub const LEN: usize = 16;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&self.node.to_le_bytes());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf
    }

    pub fn decode(context: &[u8]) -> Option<ProposalId> {
        if context.len() != Self::LEN {
            return None;
        }
        let mut node = [0u8; 8];
        let mut seq = [0u8; 8];
        node.copy_from_slice(&context[..8]);
        seq.copy_from_slice(&context[8..]);
        Some(ProposalId {
            node: u64::from_le_bytes(node),
            seq: u64::from_le_bytes(seq),
        })
    }
}

enum Pending<R> {
    Write(Responder<R>),
    Membership(Responder<()>),
}

impl<R> Pending<R> {
    fn is_closed(&self) -> bool {
        match self {
            Pending::Write(tx) => tx.is_closed(),
            Pending::Membership(tx) => tx.is_closed(),
        }
    }
}

fn discard_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

pub struct RaftNode<S: StateMachine> {
    id: u64,
    raw: RawNode<LogStore>,
    storage: LogStore,
    state_machine: S,
    members: Members,
    voters: Vec<u64>,
    pending: HashMap<u64, Pending<S::Response>>,
    next_seq: u64,
    shared: Arc<RwLock<Status>>,
    snapshot_interval: u64,
}

impl<S: StateMachine> RaftNode<S> {
    /// Create a node over `storage`.
    ///
    /// A fresh log is initialized with `voters`. A node joining an existing
    /// cluster passes the cluster's bootstrap voters, which need not include
    /// itself; it stays passive until a replicated membership change adds it.
    ///
    /// A log written by an earlier run keeps its own configuration. Its
    /// snapshot, if any, is restored into the state machine; entries after
    /// the snapshot are applied again as raft hands them back.
    pub fn new(
        id: u64,
        voters: &[u64],
        config: &RaftConfig,
        storage: LogStore,
        state_machine: S,
        members: Members,
    ) -> Result<Self> {
        let cfg = RawConfig {
            id,
            election_tick: config.election_tick,
            heartbeat_tick: config.heartbeat_tick,
            max_inflight_msgs: 256,
            check_quorum: true,
            ..Default::default()
        };
        cfg.validate()?;

        if storage.is_initialized() {
            let snapshot = storage.latest_snapshot();
            if !snapshot.is_empty() {
                let (known, state) = decode_snapshot(&snapshot.data)?;
                state_machine.restore(state)?;
                for (member, address) in known {
                    members.insert(member, address);
                }
            }
            let hs = storage.hard_state();
            info!(
                node = id,
                term = hs.term,
                commit = hs.commit,
                snapshot = snapshot.get_metadata().index,
                "Recovered raft log"
            );
        } else {
            storage.initialize(voters)?;
        }

        let mut voters = storage.conf_state().get_voters().to_vec();
        voters.sort_unstable();
        let raw = RawNode::new(&cfg, storage.clone(), &discard_logger())?;

        let mut node = Self {
            id,
            raw,
            storage,
            state_machine,
            members,
            voters,
            pending: HashMap::new(),
            next_seq: 0,
            shared: Arc::new(RwLock::new(Status::default())),
            snapshot_interval: config.snapshot_interval,
        };
        node.publish_status();
        Ok(node)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tick(&mut self) {
        self.raw.tick();
    }

    pub fn campaign(&mut self) -> Result<()> {
        self.raw.campaign()?;
        Ok(())
    }

    pub fn step(&mut self, msg: Message) -> Result<()> {
        self.raw.step(msg)?;
        Ok(())
    }

    pub fn role(&self) -> Role {
        self.raw.raft.state.into()
    }

    pub fn is_leader(&self) -> bool {
        self.raw.raft.state == StateRole::Leader
    }

    /// Current leader id, 0 when unknown.
    pub fn leader_id(&self) -> u64 {
        self.raw.raft.leader_id
    }

    pub fn term(&self) -> u64 {
        self.raw.raft.term
    }

    pub fn voters(&self) -> &[u64] {
        &self.voters
    }

    pub fn state_machine(&self) -> &S {
        &self.state_machine
    }

    pub fn status(&self) -> Status {
        Status {
            id: self.id,
            leader_id: self.leader_id(),
            term: self.term(),
            is_leader: self.is_leader(),
            voters: self.voters.clone(),
        }
    }

    /// Status as last published, readable from other threads.
    pub fn shared_status(&self) -> Arc<RwLock<Status>> {
        self.shared.clone()
    }

    pub fn publish_status(&mut self) {
        let status = self.status();
        let mut shared = self.shared.write().unwrap_or_else(PoisonError::into_inner);
        if *shared != status {
            *shared = status;
        }
    }

    fn not_leader(&self) -> Error {
        match self.leader_id() {
            0 => Error::NoLeader,
            leader => Error::NotLeader(
                self.members
                    .address(leader)
                    .unwrap_or_else(|| leader.to_string()),
            ),
        }
    }

    fn next_proposal(&mut self) -> ProposalId {
        self.next_seq += 1;
        ProposalId {
            node: self.id,
            seq: self.next_seq,
        }
    }

    /// Append `data` to the log. `respond_to` receives the state machine's
    /// response once the entry is applied locally.
    pub fn propose(&mut self, data: Vec<u8>, respond_to: Responder<S::Response>) {
        if !self.is_leader() {
            let _ = respond_to.send(Err(self.not_leader()));
            return;
        }

        let proposal = self.next_proposal();
        match self.raw.propose(proposal.encode(), data) {
            Ok(()) => {
                self.pending.insert(proposal.seq, Pending::Write(respond_to));
            }
            Err(raft::Error::ProposalDropped) => {
                let _ = respond_to.send(Err(self.not_leader()));
            }
            Err(e) => {
                let _ = respond_to.send(Err(e.into()));
            }
        }
    }

    pub fn propose_member_change(&mut self, change: MemberChange, respond_to: Responder<()>) {
        if !self.is_leader() {
            let _ = respond_to.send(Err(self.not_leader()));
            return;
        }

        let mut cc = ConfChange::default();
        match &change {
            MemberChange::Add { id, address } => {
                cc.set_change_type(ConfChangeType::AddNode);
                cc.node_id = *id;
                cc.context = address.clone().into_bytes().into();
            }
            MemberChange::Remove { id } => {
                cc.set_change_type(ConfChangeType::RemoveNode);
                cc.node_id = *id;
            }
        }

        let proposal = self.next_proposal();
        match self.raw.propose_conf_change(proposal.encode(), cc) {
            Ok(()) => {
                debug!(node = self.id, ?change, "Proposed membership change");
                self.pending
                    .insert(proposal.seq, Pending::Membership(respond_to));
            }
            Err(raft::Error::ProposalDropped) => {
                let _ = respond_to.send(Err(self.not_leader()));
            }
            Err(e) => {
                let _ = respond_to.send(Err(e.into()));
            }
        }
    }

    /// Forget proposers that stopped waiting.
    pub fn purge_abandoned(&mut self) {
        self.pending.retain(|_, pending| !pending.is_closed());
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Handle one `Ready`: persist, apply and collect outbound messages.
    ///
    /// Returns `None` when there was nothing to do.
    pub fn poll_ready(&mut self) -> Result<Option<Vec<Message>>> {
        self.maybe_snapshot()?;
        if !self.raw.has_ready() {
            return Ok(None);
        }

        let mut ready = self.raw.ready();
        let mut outbound = Vec::new();

        if let Some(ss) = ready.ss() {
            info!(
                node = self.id,
                leader = ss.leader_id,
                role = %Role::from(ss.raft_state),
                "Raft state changed"
            );
        }

        if !ready.snapshot().is_empty() {
            self.install_snapshot(ready.snapshot().clone())?;
        }
        self.apply_entries(ready.take_committed_entries())?;
        if !ready.entries().is_empty() {
            self.storage.append(ready.entries())?;
        }
        if let Some(hs) = ready.hs() {
            self.storage.set_hard_state(hs.clone())?;
        }
        outbound.extend(ready.take_messages());
        outbound.extend(ready.take_persisted_messages());

        let mut light_ready = self.raw.advance(ready);
        if let Some(commit) = light_ready.commit_index() {
            self.storage.set_commit(commit)?;
        }
        self.apply_entries(light_ready.take_committed_entries())?;
        outbound.extend(light_ready.take_messages());
        self.raw.advance_apply();

        // Delivery is not tracked; a snapshot that never arrives shows up as
        // a rejected append and is sent again.
        for msg in &outbound {
            if msg.get_msg_type() == MessageType::MsgSnapshot {
                self.raw.report_snapshot(msg.to, SnapshotStatus::Finish);
            }
        }
        Ok(Some(outbound))
    }

    /// Compact the log once enough applied entries pile up, or when a peer
    /// needs a snapshot the store cannot provide yet.
    fn maybe_snapshot(&mut self) -> Result<()> {
        let applied = self.raw.raft.raft_log.applied;
        let first = self.storage.first_index()?;
        let kept = (applied + 1).saturating_sub(first);
        if kept == 0 || (kept < self.snapshot_interval && !self.storage.snapshot_wanted()) {
            return Ok(());
        }

        let data = encode_snapshot(&self.members.snapshot(), &self.state_machine.snapshot()?)?;
        let size = data.len();
        self.storage.compact(applied, data)?;
        info!(node = self.id, index = applied, size, "Log compacted into snapshot");
        Ok(())
    }

    fn install_snapshot(&mut self, snapshot: Snapshot) -> Result<()> {
        let index = snapshot.get_metadata().index;
        let mut voters = snapshot.get_metadata().get_conf_state().get_voters().to_vec();
        voters.sort_unstable();

        let (known, state) = decode_snapshot(&snapshot.data)?;
        self.state_machine.restore(state)?;
        self.members.replace(known);
        self.storage.apply_snapshot(snapshot)?;

        self.voters = voters;
        self.publish_status();
        info!(node = self.id, index, "Installed snapshot from leader");
        Ok(())
    }

    fn take_pending(&mut self, context: &[u8]) -> Option<Pending<S::Response>> {
        match ProposalId::decode(context) {
            Some(proposal) if proposal.node == self.id => self.pending.remove(&proposal.seq),
            _ => None,
        }
    }

    fn apply_entries(&mut self, entries: Vec<Entry>) -> Result<()> {
        for entry in entries {
            let waiter = self.take_pending(&entry.context);

            match entry.get_entry_type() {
                EntryType::EntryNormal => {
                    // empty entries are appended by a new leader
                    if entry.data.is_empty() {
                        continue;
                    }
                    let response = self.state_machine.apply(entry.index, &entry.data);
                    if let Some(Pending::Write(tx)) = waiter {
                        let _ = tx.send(Ok(response));
                    }
                }
                EntryType::EntryConfChange => {
                    let result = self.apply_conf_change(&entry);
                    self.publish_status();
                    if let Err(e) = &result {
                        error!(node = self.id, index = entry.index, error = %e, "Failed to apply membership change");
                    }
                    if let Some(Pending::Membership(tx)) = waiter {
                        let _ = tx.send(result);
                    }
                }
                EntryType::EntryConfChangeV2 => {
                    warn!(node = self.id, index = entry.index, "Ignoring joint membership change");
                }
            }
        }
        Ok(())
    }

    fn apply_conf_change(&mut self, entry: &Entry) -> Result<()> {
        let mut cc = ConfChange::default();
        cc.merge_from_bytes(&entry.data)?;

        let cs = self.raw.apply_conf_change(&cc)?;
        let mut voters = cs.get_voters().to_vec();
        voters.sort_unstable();
        self.voters = voters;
        self.storage.set_conf_state(cs)?;

        match cc.get_change_type() {
            ConfChangeType::AddNode | ConfChangeType::AddLearnerNode => {
                let address = String::from_utf8_lossy(&cc.context).into_owned();
                if !address.is_empty() {
                    self.members.insert(cc.node_id, address.clone());
                }
                info!(node = self.id, added = cc.node_id, %address, "Member added");
            }
            ConfChangeType::RemoveNode => {
                if cc.node_id != self.id {
                    self.members.remove(cc.node_id);
                }
                info!(node = self.id, removed = cc.node_id, "Member removed");
            }
        }
        Ok(())
    }
}

/// Snapshot payload: `[LEN:4 LE][member directory as JSON][state machine bytes]`.
fn encode_snapshot(members: &BTreeMap<u64, String>, state: &[u8]) -> Result<Vec<u8>> {
    let directory = serde_json::to_vec(members)?;
    let len = u32::try_from(directory.len())
        .map_err(|_| Error::Encoding("member directory is too large".into()))?;
    let mut out = Vec::with_capacity(4 + directory.len() + state.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&directory);
    out.extend_from_slice(state);
    Ok(out)
}

fn decode_snapshot(data: &[u8]) -> Result<(BTreeMap<u64, String>, &[u8])> {
    if data.len() < 4 {
        return Err(Error::Encoding("snapshot is truncated".into()));
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&data[..4]);
    let len = u32::from_le_bytes(len) as usize;
    let rest = &data[4..];
    if rest.len() < len {
        return Err(Error::Encoding("snapshot is truncated".into()));
    }
    let members = serde_json::from_slice(&rest[..len])?;
    Ok((members, &rest[len..]))
}

/// Encode a message for the wire.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>> {
    Ok(msg.write_to_bytes()?)
}

pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    let mut msg = Message::default();
    msg.merge_from_bytes(bytes)?;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SyncPolicy;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every applied entry and answers with its index.
    #[derive(Clone, Default)]
    struct Recorder {
        applied: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl StateMachine for Recorder {
        type Response = u64;

        fn apply(&self, index: u64, entry: &[u8]) -> u64 {
            self.applied.lock().unwrap().push(entry.to_vec());
            index
        }

        fn snapshot(&self) -> Result<Vec<u8>> {
            Ok(serde_json::to_vec(&*self.applied.lock().unwrap())?)
        }

        fn restore(&self, data: &[u8]) -> Result<()> {
            *self.applied.lock().unwrap() = serde_json::from_slice(data)?;
            Ok(())
        }
    }

    /// Routes messages between nodes in memory. Each node logs to its own
    /// directory so it can be restarted.
    struct TestCluster {
        nodes: HashMap<u64, RaftNode<Recorder>>,
        members: Members,
        config: RaftConfig,
        dir: TempDir,
    }

    impl TestCluster {
        fn new(n: u64) -> Self {
            Self::with_config(n, RaftConfig::default())
        }

        fn with_config(n: u64, config: RaftConfig) -> Self {
            let ids: Vec<u64> = (1..=n).collect();
            let members = Members::new(ids.iter().map(|id| (*id, format!("node{}", id))));
            let mut cluster = TestCluster {
                nodes: HashMap::new(),
                members,
                config,
                dir: TempDir::new().unwrap(),
            };
            for &id in &ids {
                cluster.spawn(id, &ids);
            }
            cluster
        }

        fn spawn(&mut self, id: u64, voters: &[u64]) {
            let storage =
                LogStore::open(self.dir.path().join(id.to_string()), SyncPolicy::Flush).unwrap();
            let node = RaftNode::new(
                id,
                voters,
                &self.config,
                storage,
                Recorder::default(),
                self.members.clone(),
            )
            .unwrap();
            self.nodes.insert(id, node);
        }

        /// Drop a node and start it again from its log with a fresh state machine.
        fn restart(&mut self, id: u64) {
            let voters = self.node(id).voters().to_vec();
            self.nodes.remove(&id);
            self.spawn(id, &voters);
        }

        fn node(&self, id: u64) -> &RaftNode<Recorder> {
            &self.nodes[&id]
        }

        fn node_mut(&mut self, id: u64) -> &mut RaftNode<Recorder> {
            self.nodes.get_mut(&id).unwrap()
        }

        fn applied(&self, id: u64) -> Vec<Vec<u8>> {
            self.node(id).state_machine().applied.lock().unwrap().clone()
        }

        fn deliver(&mut self) -> bool {
            let mut messages = Vec::new();
            let mut ids: Vec<u64> = self.nodes.keys().copied().collect();
            ids.sort_unstable();
            for id in ids {
                if let Some(out) = self.node_mut(id).poll_ready().unwrap() {
                    messages.extend(out);
                }
            }
            let delivered = !messages.is_empty();
            for msg in messages {
                if let Some(node) = self.nodes.get_mut(&msg.to) {
                    // a node that does not know the sender yet refuses the
                    // message, as it would over the network
                    let _ = node.step(msg);
                }
            }
            delivered
        }

        fn stabilize(&mut self) {
            for _ in 0..100 {
                if !self.deliver() {
                    break;
                }
            }
        }

        fn elect(&mut self, id: u64) {
            self.node_mut(id).campaign().unwrap();
            self.stabilize();
            assert!(self.node(id).is_leader());
        }
    }

    #[test]
    fn test_proposal_id_encoding() {
        let id = ProposalId { node: 3, seq: 42 };
        assert_eq!(ProposalId::decode(&id.encode()), Some(id));
        assert_eq!(ProposalId::decode(b"short"), None);
    }

    #[test]
    fn test_leader_election() {
        let mut cluster = TestCluster::new(3);
        cluster.elect(1);

        for id in 1..=3 {
            assert_eq!(cluster.node(id).leader_id(), 1);
        }
        assert_eq!(cluster.node(2).role(), Role::Follower);
    }

    #[test]
    fn test_proposal_applies_everywhere_and_responds() {
        let mut cluster = TestCluster::new(3);
        cluster.elect(1);

        let (tx, mut rx) = oneshot::channel();
        cluster.node_mut(1).propose(b"SET a 1".to_vec(), tx);
        cluster.stabilize();

        let index = rx.try_recv().unwrap().unwrap();
        assert!(index > 1);
        for id in 1..=3 {
            assert_eq!(cluster.applied(id), vec![b"SET a 1".to_vec()]);
        }
        assert_eq!(cluster.node(1).pending_len(), 0);
    }

    #[test]
    fn test_follower_rejects_proposal() {
        let mut cluster = TestCluster::new(3);
        cluster.elect(1);

        let (tx, mut rx) = oneshot::channel();
        cluster.node_mut(2).propose(b"SET a 1".to_vec(), tx);

        match rx.try_recv().unwrap() {
            Err(Error::NotLeader(leader)) => assert_eq!(leader, "node1"),
            other => panic!("expected NotLeader, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_no_leader_before_election() {
        let mut cluster = TestCluster::new(3);
        let (tx, mut rx) = oneshot::channel();
        cluster.node_mut(1).propose(b"x".to_vec(), tx);
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::NoLeader)));
    }

    #[test]
    fn test_abandoned_proposals_are_purged() {
        let mut cluster = TestCluster::new(3);
        cluster.elect(1);

        let (tx, rx) = oneshot::channel();
        cluster.node_mut(1).propose(b"x".to_vec(), tx);
        assert_eq!(cluster.node(1).pending_len(), 1);

        drop(rx);
        cluster.node_mut(1).purge_abandoned();
        assert_eq!(cluster.node(1).pending_len(), 0);
    }

    #[test]
    fn test_joining_node_catches_up_after_add() {
        let mut cluster = TestCluster::new(3);
        cluster.elect(1);

        let (tx, _rx) = oneshot::channel();
        cluster.node_mut(1).propose(b"before".to_vec(), tx);
        cluster.stabilize();

        // joins with the bootstrap voters and waits to be added
        cluster.spawn(4, &[1, 2, 3]);

        let (tx, mut rx) = oneshot::channel();
        cluster.node_mut(1).propose_member_change(
            MemberChange::Add {
                id: 4,
                address: "node4".into(),
            },
            tx,
        );
        cluster.stabilize();
        rx.try_recv().unwrap().unwrap();

        assert_eq!(cluster.node(1).voters(), &[1, 2, 3, 4]);
        assert_eq!(cluster.members.address(4).as_deref(), Some("node4"));

        let (tx, _rx) = oneshot::channel();
        cluster.node_mut(1).propose(b"after".to_vec(), tx);
        cluster.stabilize();

        assert_eq!(
            cluster.applied(4),
            vec![b"before".to_vec(), b"after".to_vec()]
        );
        assert_eq!(cluster.node(4).leader_id(), 1);
    }

    #[test]
    fn test_remove_member() {
        let mut cluster = TestCluster::new(3);
        cluster.elect(1);

        let (tx, mut rx) = oneshot::channel();
        cluster
            .node_mut(1)
            .propose_member_change(MemberChange::Remove { id: 3 }, tx);
        cluster.stabilize();
        rx.try_recv().unwrap().unwrap();

        assert_eq!(cluster.node(1).voters(), &[1, 2]);
        assert_eq!(cluster.members.address(3), None);
    }

    #[test]
    fn test_restart_recovers_term_vote_and_log() {
        let mut cluster = TestCluster::new(3);
        cluster.elect(1);
        for data in [b"a".to_vec(), b"b".to_vec()] {
            let (tx, _rx) = oneshot::channel();
            cluster.node_mut(1).propose(data, tx);
        }
        cluster.stabilize();

        let term = cluster.node(2).term();
        cluster.restart(2);
        assert_eq!(cluster.node(2).term(), term);
        assert_eq!(cluster.node(2).storage.hard_state().vote, 1);
        assert_eq!(cluster.node(2).voters(), &[1, 2, 3]);

        // committed entries are handed back on the first ready
        cluster.stabilize();
        assert_eq!(cluster.applied(2), vec![b"a".to_vec(), b"b".to_vec()]);

        let (tx, mut rx) = oneshot::channel();
        cluster.node_mut(1).propose(b"c".to_vec(), tx);
        cluster.stabilize();
        rx.try_recv().unwrap().unwrap();
        assert_eq!(cluster.applied(2).len(), 3);
    }

    #[test]
    fn test_restart_from_snapshot() {
        let config = RaftConfig {
            snapshot_interval: 2,
            ..RaftConfig::default()
        };
        let mut cluster = TestCluster::with_config(3, config);
        cluster.elect(1);
        for i in 0..5 {
            let (tx, _rx) = oneshot::channel();
            cluster.node_mut(1).propose(format!("v{}", i).into_bytes(), tx);
            cluster.stabilize();
        }
        let expected = cluster.applied(3);
        assert_eq!(expected.len(), 5);
        assert!(cluster.node(3).storage.first_index().unwrap() > 1);

        cluster.restart(3);
        cluster.stabilize();
        assert_eq!(cluster.applied(3), expected);
    }

    #[test]
    fn test_member_added_after_compaction_catches_up_by_snapshot() {
        let config = RaftConfig {
            snapshot_interval: 2,
            ..RaftConfig::default()
        };
        let heartbeat_tick = config.heartbeat_tick;
        let mut cluster = TestCluster::with_config(3, config);
        cluster.elect(1);
        for i in 0..4 {
            let (tx, _rx) = oneshot::channel();
            cluster.node_mut(1).propose(format!("v{}", i).into_bytes(), tx);
            cluster.stabilize();
        }
        assert!(cluster.node(1).storage.first_index().unwrap() > 1);

        cluster.spawn(4, &[1, 2, 3]);
        let (tx, mut rx) = oneshot::channel();
        cluster.node_mut(1).propose_member_change(
            MemberChange::Add {
                id: 4,
                address: "node4".into(),
            },
            tx,
        );
        cluster.stabilize();
        rx.try_recv().unwrap().unwrap();

        // heartbeats retry the snapshot once one covering node 4 exists
        for _ in 0..10 {
            if !cluster.applied(4).is_empty() {
                break;
            }
            for _ in 0..heartbeat_tick {
                cluster.node_mut(1).tick();
            }
            cluster.stabilize();
        }
        assert_eq!(cluster.applied(4), cluster.applied(1));
        assert_eq!(cluster.node(4).voters(), &[1, 2, 3, 4]);

        let (tx, _rx) = oneshot::channel();
        cluster.node_mut(1).propose(b"after".to_vec(), tx);
        cluster.stabilize();
        assert_eq!(cluster.applied(4).last().map(Vec::as_slice), Some(&b"after"[..]));
    }

    #[test]
    fn test_snapshot_envelope() {
        let members = BTreeMap::from([(1, "a:1".to_string()), (2, "b:2".to_string())]);
        let data = encode_snapshot(&members, b"state").unwrap();
        let (decoded, state) = decode_snapshot(&data).unwrap();
        assert_eq!(decoded, members);
        assert_eq!(state, b"state");
        assert!(decode_snapshot(&data[..6]).is_err());
    }

    #[test]
    fn test_message_codec() {
        let mut msg = Message::default();
        msg.to = 2;
        msg.from = 1;
        msg.term = 7;
        let decoded = decode_message(&encode_message(&msg).unwrap()).unwrap();
        assert_eq!(decoded.to, 2);
        assert_eq!(decoded.term, 7);
    }
}
