//! Event extraction as a pure diff over node status snapshots.
//!
//! The harness snapshots a node's observable status before an operation,
//! performs the operation, and hands both snapshots plus a summary of the
//! ready batches to `diff_events`. Keeping emission out of the ready loop
//! makes it deterministic and testable without a consensus node.

use crate::trace::{Event, NodeId};

/// Role of a consensus node, decoupled from the library's own enum so the
/// diff stays independent of consensus internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    PreCandidate,
    Candidate,
    Leader,
}

/// Observable status of one node at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub role: Role,
    pub term: u64,
    /// Current leader as known to this node; `0` when unknown.
    pub leader: NodeId,
    pub commit: u64,
}

impl StatusSnapshot {
    /// The status of a freshly (re)started node.
    pub fn initial(term: u64, commit: u64) -> Self {
        Self {
            role: Role::Follower,
            term,
            leader: 0,
            commit,
        }
    }
}

/// What happened during the ready batches of one harness operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadySummary {
    /// Number of ready batches that contained at least one newly
    /// committed entry.
    pub committed_batches: usize,
}

/// Computes the abstract events emitted by one harness operation on
/// `node`, given its status before and after.
///
/// Ordering is fixed: role-change events, then commit-index events, then
/// the synthetic client request a new leader issues.
pub fn diff_events(
    node: NodeId,
    before: &StatusSnapshot,
    after: &StatusSnapshot,
    ready: &ReadySummary,
) -> Vec<Event> {
    let mut events = Vec::new();

    let entered_candidate = after.role == Role::Candidate
        && (before.role == Role::Follower || after.term > before.term);
    if entered_candidate {
        events.push(Event::timeout(node));
    }

    let became_leader = after.role == Role::Leader && before.role != Role::Leader;
    if became_leader {
        events.push(Event::become_leader(node));
    }

    // One AdvanceCommitIndex per ready batch with commits, no matter how
    // many entries the batch carried. Verbatim behavior of the system
    // being modeled; possibly an abstraction, possibly a bug upstream.
    // TODO: check against the TLA+ spec whether per-entry events would
    // change the reachable state set.
    for _ in 0..ready.committed_batches {
        events.push(Event::advance_commit_index(node));
    }

    if became_leader {
        // Every new leader commits a no-op; the model expects to see it
        // as a zero-valued client request.
        events.push(Event::client_request(0, node));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(role: Role, term: u64) -> StatusSnapshot {
        StatusSnapshot {
            role,
            term,
            leader: 0,
            commit: 0,
        }
    }

    #[test]
    fn follower_to_candidate_emits_timeout() {
        let events = diff_events(
            1,
            &status(Role::Follower, 1),
            &status(Role::Candidate, 2),
            &ReadySummary::default(),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Timeout");
        assert_eq!(events[0].params["node"], 1);
    }

    #[test]
    fn candidate_restarting_election_with_higher_term_emits_timeout() {
        let events = diff_events(
            2,
            &status(Role::Candidate, 3),
            &status(Role::Candidate, 4),
            &ReadySummary::default(),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Timeout");
    }

    #[test]
    fn same_term_candidate_is_not_a_new_timeout() {
        let events = diff_events(
            2,
            &status(Role::Candidate, 3),
            &status(Role::Candidate, 3),
            &ReadySummary::default(),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn becoming_leader_emits_leader_then_noop_request() {
        let events = diff_events(
            1,
            &status(Role::Candidate, 2),
            &status(Role::Leader, 2),
            &ReadySummary::default(),
        );
        let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["BecomeLeader", "ClientRequest"]);
        assert_eq!(events[1].params["request"], 0);
        assert_eq!(events[1].params["leader"], 1);
    }

    #[test]
    fn commit_events_sit_between_role_change_and_noop_request() {
        let ready = ReadySummary {
            committed_batches: 2,
        };
        let events = diff_events(3, &status(Role::Candidate, 5), &status(Role::Leader, 5), &ready);
        let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            ["BecomeLeader", "AdvanceCommitIndex", "AdvanceCommitIndex", "ClientRequest"]
        );
        assert_eq!(events[1].params["i"], 3);
    }

    #[test]
    fn quiet_operation_emits_nothing() {
        let events = diff_events(
            1,
            &status(Role::Follower, 1),
            &status(Role::Follower, 1),
            &ReadySummary::default(),
        );
        assert!(events.is_empty());
    }
}
