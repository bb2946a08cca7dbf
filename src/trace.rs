//! Scheduling-choice traces and abstract event traces.
//!
//! A `Trace` is the replayable record of one execution: the ordered
//! scheduling choices the driver consumed or generated, one per step. An
//! `EventTrace` is what that execution looked like at the consensus level,
//! and is what gets shipped to the model-checking server.
//!
//! Both are plain value types. Children never share mutable state with
//! their parents: mutants are produced by deep copy under a copy filter
//! that drops draws the interpreter never consumed.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Identifier of a cluster node. Nodes are numbered `1..=N`; `0` is the
/// sentinel for "nobody" (the null scheduling action, or no leader).
pub type NodeId = u64;

// ============================================================================
// Scheduling Choices
// ============================================================================

/// One resolved scheduler decision.
///
/// Only the tag and the resolved value are recorded; the rule that asked
/// for the draw is not part of the trace. `RandomInteger` additionally
/// records the bound it was drawn under, so a mutator can resample within
/// the original range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChoiceKind {
    /// Schedule the named node to run (deliver its inbound messages, then
    /// tick). Node `0` is the null action.
    Node { node: NodeId },
    /// A boolean draw, consumed by the strategy when it needs to branch.
    RandomBoolean { value: bool },
    /// A bounded integer draw in `[0, bound)`.
    RandomInteger { value: u64, bound: u64 },
}

/// A recorded choice plus the consumption marker set by the step
/// interpreter. Unconsumed boolean/integer draws are dropped when a trace
/// is copied for mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(flatten)]
    pub kind: ChoiceKind,
    #[serde(default)]
    pub consumed: bool,
}

impl Choice {
    /// A node-scheduling choice.
    pub fn node(node: NodeId) -> Self {
        Self {
            kind: ChoiceKind::Node { node },
            consumed: false,
        }
    }

    /// A resolved boolean draw.
    pub fn random_boolean(value: bool) -> Self {
        Self {
            kind: ChoiceKind::RandomBoolean { value },
            consumed: false,
        }
    }

    /// A resolved integer draw in `[0, bound)`.
    pub fn random_integer(value: u64, bound: u64) -> Self {
        Self {
            kind: ChoiceKind::RandomInteger { value, bound },
            consumed: false,
        }
    }
}

/// Predicate over choices used when deep-copying a trace for mutation.
pub type CopyFilter = fn(&Choice) -> bool;

/// The default copy filter: node choices are kept unconditionally,
/// boolean/integer draws only if the interpreter consumed them.
pub fn default_copy_filter(choice: &Choice) -> bool {
    match choice.kind {
        ChoiceKind::Node { .. } => true,
        _ => choice.consumed,
    }
}

// ============================================================================
// Traces
// ============================================================================

/// An ordered, finite sequence of scheduling choices. Replayable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    choices: Vec<Choice>,
}

impl Trace {
    /// Creates an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a choice.
    pub fn push(&mut self, choice: Choice) {
        self.choices.push(choice);
    }

    /// Number of recorded choices.
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    /// True if no choices are recorded.
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Returns the choice at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Choice> {
        self.choices.get(index)
    }

    /// Iterates over the recorded choices.
    pub fn iter(&self) -> impl Iterator<Item = &Choice> {
        self.choices.iter()
    }

    /// Mutable access for in-place mutation operators.
    pub fn choices_mut(&mut self) -> &mut Vec<Choice> {
        &mut self.choices
    }

    /// Deep copy keeping only choices accepted by `filter`.
    pub fn filtered_copy(&self, filter: CopyFilter) -> Trace {
        Trace {
            choices: self.choices.iter().filter(|c| filter(c)).cloned().collect(),
        }
    }

    /// Truncates the trace to `len` choices.
    pub fn truncate(&mut self, len: usize) {
        self.choices.truncate(len);
    }
}

// ============================================================================
// Events
// ============================================================================

/// An observable consensus-level occurrence.
///
/// The wire form is `{"Name", "Params", "Reset"}`; `node` is transport
/// bookkeeping only and is never serialized to the model server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(skip)]
    pub node: Option<NodeId>,
    #[serde(rename = "Params")]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "Reset")]
    pub reset: bool,
}

impl Event {
    fn new(name: &str, node: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            node,
            params: BTreeMap::new(),
            reset: false,
        }
    }

    fn with_param(mut self, key: &str, value: u64) -> Self {
        self.params
            .insert(key.to_string(), serde_json::Value::from(value));
        self
    }

    /// A node's election timer fired and it entered the candidate role.
    pub fn timeout(node: NodeId) -> Self {
        Self::new("Timeout", Some(node)).with_param("node", node)
    }

    /// A node won an election.
    pub fn become_leader(node: NodeId) -> Self {
        Self::new("BecomeLeader", Some(node)).with_param("node", node)
    }

    /// A node advanced its commit index.
    pub fn advance_commit_index(node: NodeId) -> Self {
        Self::new("AdvanceCommitIndex", Some(node)).with_param("i", node)
    }

    /// A client proposal was injected at the leader. `request` 0 is the
    /// synthetic no-op every new leader commits.
    pub fn client_request(request: u64, leader: NodeId) -> Self {
        Self::new("ClientRequest", Some(leader))
            .with_param("request", request)
            .with_param("leader", leader)
    }

    /// Transport-level send (optional for the model).
    pub fn send_message(from: NodeId, to: NodeId, kind: &str) -> Self {
        let mut ev = Self::new("SendMessage", Some(from))
            .with_param("from", from)
            .with_param("to", to);
        ev.params
            .insert("type".to_string(), serde_json::Value::from(kind));
        ev
    }

    /// Transport-level delivery (optional for the model).
    pub fn deliver_message(from: NodeId, to: NodeId, kind: &str) -> Self {
        let mut ev = Self::new("DeliverMessage", Some(to))
            .with_param("from", from)
            .with_param("to", to);
        ev.params
            .insert("type".to_string(), serde_json::Value::from(kind));
        ev
    }

    /// The end-of-trace sentinel appended on the wire.
    pub fn reset_marker() -> Self {
        Self {
            name: String::new(),
            node: None,
            params: BTreeMap::new(),
            reset: true,
        }
    }
}

/// The ordered sequence of events produced by one execution of a trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTrace {
    events: Vec<Event>,
}

impl EventTrace {
    /// Creates an empty event trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one event.
    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Appends a batch of events in order.
    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        self.events.extend(events);
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if no events were recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterates over recorded events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Returns the recorded events as a slice.
    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    /// Canonical content hash of the event trace (hex-encoded sha256 of
    /// the wire JSON). Params maps are sorted, so equal traces always
    /// hash equally.
    pub fn canonical_hash(&self) -> String {
        let json = serde_json::to_vec(&self.events).expect("event trace serializes");
        let mut hasher = Sha256::new();
        hasher.update(&json);
        hex::encode(hasher.finalize())
    }

    /// The JSON body posted to the model server: every event followed by
    /// the `Reset: true` sentinel.
    pub fn to_wire_json(&self) -> Result<String, serde_json::Error> {
        let mut wire = self.events.clone();
        wire.push(Event::reset_marker());
        serde_json::to_string(&wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_roundtrips_through_json() {
        let mut trace = Trace::new();
        trace.push(Choice::node(1));
        let mut b = Choice::random_boolean(true);
        b.consumed = true;
        trace.push(b);
        trace.push(Choice::random_integer(2, 4));

        let json = serde_json::to_string(&trace).unwrap();
        let back: Trace = serde_json::from_str(&json).unwrap();
        assert_eq!(trace, back);
    }

    #[test]
    fn event_trace_roundtrips_and_node_is_not_serialized() {
        let mut events = EventTrace::new();
        events.push(Event::timeout(1));
        events.push(Event::become_leader(1));
        events.push(Event::client_request(0, 1));

        let json = serde_json::to_string(&events).unwrap();
        assert!(json.contains("\"Name\":\"Timeout\""));

        // Each serialized event carries exactly the wire fields; the
        // transport-only node field does not appear.
        let raw: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        for obj in &raw {
            let keys: Vec<&str> = obj.as_object().unwrap().keys().map(String::as_str).collect();
            assert_eq!(keys, ["Name", "Params", "Reset"]);
        }

        let back: EventTrace = serde_json::from_str(&json).unwrap();
        // Equal up to the transport-only node field, which does not survive.
        assert_eq!(back.len(), events.len());
        for (a, b) in back.iter().zip(events.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.params, b.params);
            assert_eq!(a.reset, b.reset);
            assert_eq!(a.node, None);
        }
    }

    #[test]
    fn wire_json_ends_with_reset_sentinel() {
        let mut events = EventTrace::new();
        events.push(Event::become_leader(2));

        let wire = events.to_wire_json().unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["Reset"], serde_json::Value::Bool(false));
        assert_eq!(parsed[1]["Reset"], serde_json::Value::Bool(true));
    }

    #[test]
    fn canonical_hash_is_stable_and_content_sensitive() {
        let mut a = EventTrace::new();
        a.push(Event::timeout(1));
        let mut b = EventTrace::new();
        b.push(Event::timeout(1));
        let mut c = EventTrace::new();
        c.push(Event::timeout(2));

        assert_eq!(a.canonical_hash(), b.canonical_hash());
        assert_ne!(a.canonical_hash(), c.canonical_hash());
    }

    #[test]
    fn filtered_copy_drops_unconsumed_draws_but_keeps_nodes() {
        let mut trace = Trace::new();
        let mut n = Choice::node(3);
        n.consumed = false;
        trace.push(n);
        let mut kept = Choice::random_boolean(true);
        kept.consumed = true;
        trace.push(kept);
        trace.push(Choice::random_integer(1, 4)); // never consumed

        let copy = trace.filtered_copy(default_copy_filter);
        assert_eq!(copy.len(), 2);
        assert!(matches!(copy.get(0).unwrap().kind, ChoiceKind::Node { node: 3 }));
        assert!(matches!(
            copy.get(1).unwrap().kind,
            ChoiceKind::RandomBoolean { value: true }
        ));
    }

    #[test]
    fn filtered_copy_is_isolated_from_parent() {
        let mut parent = Trace::new();
        parent.push(Choice::node(1));
        parent.push(Choice::node(2));

        let mut child = parent.filtered_copy(default_copy_filter);
        child.choices_mut()[0] = Choice::node(9);

        assert!(matches!(parent.get(0).unwrap().kind, ChoiceKind::Node { node: 1 }));
    }
}
