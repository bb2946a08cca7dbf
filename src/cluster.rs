//! Deterministic in-process simulation of an N-node raft cluster.
//!
//! The harness owns every node, its storage, and every in-flight message;
//! nothing runs unless a scheduling choice drives it. Each operation
//! snapshots the target node's observable status before and after, and
//! abstract events are derived from the pair by the pure diff in
//! [`crate::events`]. The outside observer sees only the accumulated
//! event trace and each node's committed client log.
//!
//! Determinism notes: message order is controlled entirely by the queue
//! and the scheduler; the consensus library's election-timeout
//! randomization is pinned by the default one-tick randomization window
//! (`min_election_tick + 1 == max_election_tick`). Widening the window
//! via `election_jitter` deliberately lets library randomness through.

use crate::error::FuzzError;
use crate::events::{diff_events, ReadySummary, Role, StatusSnapshot};
use crate::invariant::{InvariantTracker, InvariantViolation};
use crate::queue::MessageQueue;
use crate::trace::{Event, EventTrace, NodeId};
use raft::eraftpb::{ConfState, Entry, EntryType, Message, Snapshot};
use raft::storage::MemStorage;
use raft::{Config, RawNode, StateRole};
use std::collections::BTreeMap;

// ============================================================================
// Configuration
// ============================================================================

/// Static parameters of the simulated cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of nodes, identified `1..=num_nodes`.
    pub num_nodes: u64,
    /// Ticks of silence before a follower starts an election.
    pub election_tick: usize,
    /// Ticks between leader heartbeats.
    pub heartbeat_tick: usize,
    /// Record transport-level `SendMessage`/`DeliverMessage` events.
    /// These are optional for the model and off by default.
    pub record_transport_events: bool,
    /// Width of the election-timeout randomization window, in ticks.
    /// The default of 1 pins the library's internal draw to a single
    /// value; wider windows let real timer randomness through and break
    /// replay determinism.
    pub election_jitter: usize,
    /// Storage-corruption fault: the named node records corrupted bytes
    /// for every committed client entry, so its committed log diverges
    /// from the rest of the cluster.
    pub corrupt_storage_on: Option<NodeId>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_nodes: 3,
            election_tick: 10,
            heartbeat_tick: 3,
            record_transport_events: false,
            election_jitter: 1,
            corrupt_storage_on: None,
        }
    }
}

impl ClusterConfig {
    /// Sets the number of nodes.
    pub fn with_num_nodes(mut self, num_nodes: u64) -> Self {
        self.num_nodes = num_nodes;
        self
    }

    /// Enables transport-level event recording.
    pub fn with_transport_events(mut self) -> Self {
        self.record_transport_events = true;
        self
    }

    /// Widens the election-timeout randomization window.
    pub fn with_election_jitter(mut self, jitter: usize) -> Self {
        self.election_jitter = jitter;
        self
    }

    /// Enables the storage-corruption fault on one node.
    pub fn with_storage_corruption(mut self, node: NodeId) -> Self {
        self.corrupt_storage_on = Some(node);
        self
    }
}

/// Read-only view of the cluster handed to scheduling strategies.
#[derive(Debug, Clone)]
pub struct ClusterView {
    pub num_nodes: u64,
    pub live: Vec<NodeId>,
    pub leader: Option<NodeId>,
}

// ============================================================================
// Per-Node State
// ============================================================================

struct ClusterNode {
    id: NodeId,
    /// `None` while the node is crashed.
    raw: Option<RawNode<MemStorage>>,
    /// Persistent-storage stand-in, retained across crash/restart.
    storage: MemStorage,
    /// Committed client entries, in commit order.
    committed: Vec<Vec<u8>>,
    /// Raft index of the last applied committed entry.
    last_applied: u64,
    /// Storage-corruption fault active on this node.
    corrupt_storage: bool,
}

impl std::fmt::Debug for ClusterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterNode")
            .field("id", &self.id)
            .field("raw_is_some", &self.raw.is_some())
            .field("committed", &self.committed)
            .field("last_applied", &self.last_applied)
            .field("corrupt_storage", &self.corrupt_storage)
            .finish()
    }
}

/// Applies a batch of committed entries to the node's client log.
/// Returns true if the batch was non-empty.
fn apply_committed(
    committed: &mut Vec<Vec<u8>>,
    last_applied: &mut u64,
    corrupt: bool,
    entries: Vec<Entry>,
) -> bool {
    let mut any = false;
    for entry in entries {
        any = true;
        *last_applied = entry.index;
        if entry.get_entry_type() == EntryType::EntryNormal && !entry.data.is_empty() {
            let data = if corrupt {
                entry.data.iter().map(|b| !b).collect()
            } else {
                entry.data.to_vec()
            };
            committed.push(data);
        }
    }
    any
}

impl ClusterNode {
    /// Drains every pending ready batch, collecting outbound messages and
    /// summarizing commits. Follows the canonical raft ready loop:
    /// send, persist, advance, apply.
    fn drain(&mut self) -> (ReadySummary, Vec<Message>) {
        let mut summary = ReadySummary::default();
        let mut outbound = Vec::new();
        let Some(raw) = self.raw.as_mut() else {
            return (summary, outbound);
        };

        while raw.has_ready() {
            let mut ready = raw.ready();
            let mut batch_committed = false;

            outbound.extend(ready.take_messages());
            if *ready.snapshot() != Snapshot::default() {
                let _ = self.storage.wl().apply_snapshot(ready.snapshot().clone());
            }
            batch_committed |= apply_committed(
                &mut self.committed,
                &mut self.last_applied,
                self.corrupt_storage,
                ready.take_committed_entries(),
            );
            if !ready.entries().is_empty() {
                let _ = self.storage.wl().append(ready.entries());
            }
            if let Some(hs) = ready.hs() {
                self.storage.wl().set_hardstate(hs.clone());
            }
            outbound.extend(ready.take_persisted_messages());

            let mut light = raw.advance(ready);
            if let Some(commit) = light.commit_index() {
                self.storage.wl().mut_hard_state().set_commit(commit);
            }
            outbound.extend(light.take_messages());
            batch_committed |= apply_committed(
                &mut self.committed,
                &mut self.last_applied,
                self.corrupt_storage,
                light.take_committed_entries(),
            );
            raw.advance_apply();

            if batch_committed {
                summary.committed_batches += 1;
            }
        }

        (summary, outbound)
    }
}

fn snapshot_of(raw: &RawNode<MemStorage>) -> StatusSnapshot {
    let role = match raw.raft.state {
        StateRole::Follower => Role::Follower,
        StateRole::PreCandidate => Role::PreCandidate,
        StateRole::Candidate => Role::Candidate,
        StateRole::Leader => Role::Leader,
    };
    StatusSnapshot {
        role,
        term: raw.raft.term,
        leader: raw.raft.leader_id,
        commit: raw.raft.raft_log.committed,
    }
}

// ============================================================================
// Cluster Harness
// ============================================================================

/// Owns N consensus nodes, their storage, the in-flight message pool, and
/// the cumulative event trace of the current iteration.
pub struct ClusterHarness {
    config: ClusterConfig,
    nodes: BTreeMap<NodeId, ClusterNode>,
    queue: MessageQueue,
    clock: u64,
    events: EventTrace,
    invariants: InvariantTracker,
    logger: slog::Logger,
}

impl std::fmt::Debug for ClusterHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHarness")
            .field("config", &self.config)
            .field("nodes", &self.nodes)
            .field("queue", &self.queue)
            .field("clock", &self.clock)
            .field("events", &self.events)
            .field("invariants", &self.invariants)
            .finish()
    }
}

impl ClusterHarness {
    /// Creates a fresh cluster per the configuration. Every node starts
    /// as a follower at the bootstrap term, with the full-membership
    /// configuration already committed in its storage.
    pub fn new(config: ClusterConfig) -> Result<Self, FuzzError> {
        if config.num_nodes == 0 {
            return Err(FuzzError::Config("cluster needs at least one node".into()));
        }
        if config.heartbeat_tick == 0 || config.election_tick <= config.heartbeat_tick {
            return Err(FuzzError::Config(
                "election_tick must exceed heartbeat_tick, both non-zero".into(),
            ));
        }
        let mut harness = Self {
            config,
            nodes: BTreeMap::new(),
            queue: MessageQueue::new(),
            clock: 0,
            events: EventTrace::new(),
            invariants: InvariantTracker::new(),
            // The consensus library logs through slog; the simulation
            // stays silent and deterministic.
            logger: slog::Logger::root(slog::Discard, slog::o!()),
        };
        harness.reset()?;
        Ok(harness)
    }

    /// Discards all state and instantiates fresh nodes.
    pub fn reset(&mut self) -> Result<(), FuzzError> {
        self.nodes.clear();
        self.queue.clear();
        self.events = EventTrace::new();
        self.invariants.reset();
        self.clock = 0;

        let voters: Vec<u64> = (1..=self.config.num_nodes).collect();
        for id in 1..=self.config.num_nodes {
            let storage = MemStorage::new_with_conf_state(ConfState::from((voters.clone(), vec![])));
            let raw = self.build_node(id, 0, &storage)?;
            self.nodes.insert(
                id,
                ClusterNode {
                    id,
                    raw: Some(raw),
                    storage,
                    committed: Vec::new(),
                    last_applied: 0,
                    corrupt_storage: self.config.corrupt_storage_on == Some(id),
                },
            );
        }
        Ok(())
    }

    fn build_node(
        &self,
        id: NodeId,
        applied: u64,
        storage: &MemStorage,
    ) -> Result<RawNode<MemStorage>, FuzzError> {
        let cfg = Config {
            id,
            election_tick: self.config.election_tick,
            heartbeat_tick: self.config.heartbeat_tick,
            // The default one-tick randomization window pins the
            // library's election-timeout draw to a single value.
            min_election_tick: self.config.election_tick,
            max_election_tick: self.config.election_tick + self.config.election_jitter.max(1),
            applied,
            ..Default::default()
        };
        cfg.validate()
            .map_err(|e| FuzzError::Config(format!("raft config for node {id}: {e}")))?;
        RawNode::new(&cfg, storage.clone(), &self.logger)
            .map_err(|e| FuzzError::NodeSetup(format!("node {id}: {e}")))
    }

    // ------------------------------------------------------------------
    // Scheduling operations
    // ------------------------------------------------------------------

    /// Advances one node's logical timer by one unit. A crashed or
    /// unknown node is a no-op.
    pub fn tick(&mut self, id: NodeId) {
        self.clock += 1;
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let Some(raw) = node.raw.as_mut() else {
            return;
        };
        let before = snapshot_of(raw);
        let _ = raw.tick();
        let (summary, outbound) = node.drain();
        self.finish_op(id, before, summary, outbound);
    }

    /// Delivers the `index`-th queued message from `from` to `to` and
    /// steps the receiver with it. Missing queue entries and crashed
    /// receivers are no-ops.
    pub fn deliver(&mut self, from: NodeId, to: NodeId, index: usize) {
        if !self.is_live(to) {
            return;
        }
        let Some(msg) = self.queue.take(from, to, index) else {
            return;
        };
        if self.config.record_transport_events {
            let kind = format!("{:?}", msg.get_msg_type());
            self.events.push(Event::deliver_message(from, to, &kind));
        }
        let Some(node) = self.nodes.get_mut(&to) else {
            return;
        };
        let Some(raw) = node.raw.as_mut() else {
            return;
        };
        let before = snapshot_of(raw);
        // Per-step library errors are expected (stale terms, dropped
        // leadership); the missing event is the signal.
        let _ = raw.step(msg);
        let (summary, outbound) = node.drain();
        self.finish_op(to, before, summary, outbound);
    }

    /// The composite step behind a `Node{n}` scheduling choice: deliver
    /// everything queued to `n` (senders ascending, FIFO per pair), then
    /// tick it.
    pub fn step_node(&mut self, id: NodeId) {
        if !self.is_live(id) {
            return;
        }
        for (from, count) in self.queue.senders_to(id) {
            for _ in 0..count {
                self.deliver(from, id, 0);
            }
        }
        self.tick(id);
    }

    /// Marks a node as down. Its queued outbound messages are dropped;
    /// its persisted log is retained.
    pub fn crash(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if node.raw.is_none() {
            return;
        }
        node.raw = None;
        self.queue.drop_outbound(id);
    }

    /// Restarts a crashed node from its persisted log: follower role,
    /// term and log preserved. A live or unknown node is a no-op.
    pub fn restart(&mut self, id: NodeId) -> Result<(), FuzzError> {
        let Some(node) = self.nodes.get(&id) else {
            return Ok(());
        };
        if node.raw.is_some() {
            return Ok(());
        }
        let applied = node.last_applied;
        let storage = node.storage.clone();
        let raw = self.build_node(id, applied, &storage)?;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.raw = Some(raw);
        }
        Ok(())
    }

    /// Injects a client proposal at the current leader and records the
    /// `ClientRequest` event. With no leader, a no-op with no event.
    pub fn client_request(&mut self, request: u64) {
        let Some(leader) = self.current_leader() else {
            return;
        };
        let Some(node) = self.nodes.get_mut(&leader) else {
            return;
        };
        let Some(raw) = node.raw.as_mut() else {
            return;
        };
        let before = snapshot_of(raw);
        let accepted = raw.propose(vec![], request.to_be_bytes().to_vec()).is_ok();
        let (summary, outbound) = node.drain();
        if accepted {
            self.events.push(Event::client_request(request, leader));
        }
        self.finish_op(leader, before, summary, outbound);
    }

    /// Asks the leader `from` to hand leadership to `to`. Event emission
    /// happens through the ordinary role-diff path on subsequent steps.
    pub fn transfer_leader(&mut self, from: NodeId, to: NodeId) {
        if to == 0 || to > self.config.num_nodes {
            return;
        }
        let Some(node) = self.nodes.get_mut(&from) else {
            return;
        };
        let Some(raw) = node.raw.as_mut() else {
            return;
        };
        let before = snapshot_of(raw);
        raw.transfer_leader(to);
        let (summary, outbound) = node.drain();
        self.finish_op(from, before, summary, outbound);
    }

    /// Enqueues a finished operation's outbound messages and derives its
    /// abstract events.
    fn finish_op(
        &mut self,
        id: NodeId,
        before: StatusSnapshot,
        summary: ReadySummary,
        outbound: Vec<Message>,
    ) {
        let after = match self.nodes.get(&id).and_then(|n| n.raw.as_ref()) {
            Some(raw) => snapshot_of(raw),
            None => return,
        };
        self.events.extend(diff_events(id, &before, &after, &summary));
        for msg in outbound {
            if self.config.record_transport_events {
                let kind = format!("{:?}", msg.get_msg_type());
                self.events.push(Event::send_message(msg.from, msg.to, &kind));
            }
            self.queue.push(msg);
        }
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// The current leader: among live nodes holding the majority term,
    /// the lowest-id one in the leader role. Falls back to the
    /// highest-term live leader when no leader sits in the modal term.
    pub fn current_leader(&self) -> Option<NodeId> {
        let mut term_counts: BTreeMap<u64, usize> = BTreeMap::new();
        for status in self.live_statuses().values() {
            *term_counts.entry(status.term).or_insert(0) += 1;
        }
        let majority_term = term_counts
            .iter()
            .max_by(|(ta, ca), (tb, cb)| ca.cmp(cb).then(ta.cmp(tb)))
            .map(|(term, _)| *term)?;

        let statuses = self.live_statuses();
        let mut leaders: Vec<(NodeId, u64)> = statuses
            .iter()
            .filter(|(_, s)| s.role == Role::Leader)
            .map(|(id, s)| (*id, s.term))
            .collect();
        if leaders.is_empty() {
            return None;
        }
        if let Some((id, _)) = leaders.iter().find(|(_, term)| *term == majority_term) {
            return Some(*id);
        }
        leaders.sort_by(|(ia, ta), (ib, tb)| tb.cmp(ta).then(ia.cmp(ib)));
        leaders.first().map(|(id, _)| *id)
    }

    /// Read-only snapshot for strategies.
    pub fn view(&self) -> ClusterView {
        ClusterView {
            num_nodes: self.config.num_nodes,
            live: self
                .nodes
                .values()
                .filter(|n| n.raw.is_some())
                .map(|n| n.id)
                .collect(),
            leader: self.current_leader(),
        }
    }

    /// Observable status of a live node.
    pub fn status(&self, id: NodeId) -> Option<StatusSnapshot> {
        self.nodes.get(&id)?.raw.as_ref().map(snapshot_of)
    }

    /// True if the node exists and is not crashed.
    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.raw.is_some())
    }

    /// The committed client entries of a node, in commit order.
    pub fn committed_log(&self, id: NodeId) -> Option<&[Vec<u8>]> {
        self.nodes.get(&id).map(|n| n.committed.as_slice())
    }

    /// Number of configured nodes.
    pub fn num_nodes(&self) -> u64 {
        self.config.num_nodes
    }

    /// Number of in-flight messages.
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    /// Logical time elapsed, in ticks.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// The events accumulated so far this iteration.
    pub fn events(&self) -> &EventTrace {
        &self.events
    }

    /// Takes the accumulated event trace, leaving the harness's empty.
    pub fn take_events(&mut self) -> EventTrace {
        std::mem::take(&mut self.events)
    }

    /// Evaluates the safety invariants. The driver calls this after every
    /// scheduling step; a violation is fatal to the campaign.
    pub fn check_invariants(&mut self) -> Result<(), InvariantViolation> {
        let statuses = self.live_statuses();
        let logs: BTreeMap<NodeId, &[Vec<u8>]> = self
            .nodes
            .values()
            .map(|n| (n.id, n.committed.as_slice()))
            .collect();
        self.invariants.check(&statuses, &logs)
    }

    fn live_statuses(&self) -> BTreeMap<NodeId, StatusSnapshot> {
        self.nodes
            .values()
            .filter_map(|n| n.raw.as_ref().map(|raw| (n.id, snapshot_of(raw))))
            .collect()
    }
}
