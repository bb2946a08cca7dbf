//! Consensus safety invariants checked after every scheduling step.
//!
//! Violations are never masked: the driver treats any of these as fatal
//! to the whole campaign, persists the offending trace, and exits
//! non-zero. Checks are value-returning, not panicking, so tests can
//! assert on them directly.

use crate::events::{Role, StatusSnapshot};
use crate::trace::NodeId;
use std::collections::BTreeMap;
use thiserror::Error;

/// A violated consensus safety property.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// Two live nodes claim leadership in the same term.
    #[error("election safety violated: nodes {a} and {b} both lead term {term}")]
    TwoLeaders { term: u64, a: NodeId, b: NodeId },

    /// A node's commit index moved backwards.
    #[error("commit index on node {node} regressed from {from} to {to}")]
    CommitRegression { node: NodeId, from: u64, to: u64 },

    /// Two nodes disagree on a committed log prefix.
    #[error("committed logs of nodes {a} and {b} diverge at position {position}")]
    LogDivergence {
        a: NodeId,
        b: NodeId,
        position: usize,
    },
}

/// Tracks per-node commit high-water marks and evaluates the safety
/// invariants against the cluster's current observable state.
#[derive(Debug, Default)]
pub struct InvariantTracker {
    commit_high: BTreeMap<NodeId, u64>,
}

impl InvariantTracker {
    /// Creates a tracker with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets all history (for a cluster reset).
    pub fn reset(&mut self) {
        self.commit_high.clear();
    }

    /// Checks all invariants against the live nodes' statuses and their
    /// committed client-entry logs. `statuses` and `logs` contain only
    /// live nodes.
    pub fn check(
        &mut self,
        statuses: &BTreeMap<NodeId, StatusSnapshot>,
        logs: &BTreeMap<NodeId, &[Vec<u8>]>,
    ) -> Result<(), InvariantViolation> {
        self.check_election_safety(statuses)?;
        self.check_commit_monotonic(statuses)?;
        Self::check_log_agreement(logs)?;
        Ok(())
    }

    /// At most one leader per term among live nodes.
    fn check_election_safety(
        &self,
        statuses: &BTreeMap<NodeId, StatusSnapshot>,
    ) -> Result<(), InvariantViolation> {
        let mut leader_of_term: BTreeMap<u64, NodeId> = BTreeMap::new();
        for (node, status) in statuses {
            if status.role != Role::Leader {
                continue;
            }
            if let Some(other) = leader_of_term.insert(status.term, *node) {
                return Err(InvariantViolation::TwoLeaders {
                    term: status.term,
                    a: other,
                    b: *node,
                });
            }
        }
        Ok(())
    }

    /// Per-node commit index never regresses. Crashed nodes keep their
    /// high-water mark; restart preserves the persisted commit.
    fn check_commit_monotonic(
        &mut self,
        statuses: &BTreeMap<NodeId, StatusSnapshot>,
    ) -> Result<(), InvariantViolation> {
        for (node, status) in statuses {
            let high = self.commit_high.entry(*node).or_insert(0);
            if status.commit < *high {
                return Err(InvariantViolation::CommitRegression {
                    node: *node,
                    from: *high,
                    to: status.commit,
                });
            }
            *high = status.commit;
        }
        Ok(())
    }

    /// Committed client-entry logs agree on their common prefix.
    fn check_log_agreement(
        logs: &BTreeMap<NodeId, &[Vec<u8>]>,
    ) -> Result<(), InvariantViolation> {
        let nodes: Vec<(&NodeId, &&[Vec<u8>])> = logs.iter().collect();
        for (i, (a, log_a)) in nodes.iter().enumerate() {
            for (b, log_b) in nodes.iter().skip(i + 1) {
                let common = log_a.len().min(log_b.len());
                for position in 0..common {
                    if log_a[position] != log_b[position] {
                        return Err(InvariantViolation::LogDivergence {
                            a: **a,
                            b: **b,
                            position,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(role: Role, term: u64, commit: u64) -> StatusSnapshot {
        StatusSnapshot {
            role,
            term,
            leader: 0,
            commit,
        }
    }

    #[test]
    fn single_leader_per_term_is_fine() {
        let mut tracker = InvariantTracker::new();
        let mut statuses = BTreeMap::new();
        statuses.insert(1, status(Role::Leader, 2, 1));
        statuses.insert(2, status(Role::Follower, 2, 1));
        statuses.insert(3, status(Role::Leader, 3, 1));

        assert!(tracker.check(&statuses, &BTreeMap::new()).is_ok());
    }

    #[test]
    fn two_leaders_same_term_is_a_violation() {
        let mut tracker = InvariantTracker::new();
        let mut statuses = BTreeMap::new();
        statuses.insert(1, status(Role::Leader, 2, 0));
        statuses.insert(3, status(Role::Leader, 2, 0));

        let err = tracker.check(&statuses, &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            InvariantViolation::TwoLeaders { term: 2, a: 1, b: 3 }
        );
    }

    #[test]
    fn commit_regression_is_caught() {
        let mut tracker = InvariantTracker::new();
        let mut statuses = BTreeMap::new();
        statuses.insert(1, status(Role::Follower, 1, 5));
        tracker.check(&statuses, &BTreeMap::new()).unwrap();

        statuses.insert(1, status(Role::Follower, 1, 3));
        let err = tracker.check(&statuses, &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            InvariantViolation::CommitRegression { node: 1, from: 5, to: 3 }
        );
    }

    #[test]
    fn diverging_committed_prefixes_are_caught() {
        let mut tracker = InvariantTracker::new();
        let log_a = vec![vec![1u8], vec![2u8]];
        let log_b = vec![vec![1u8], vec![9u8], vec![3u8]];
        let mut logs: BTreeMap<NodeId, &[Vec<u8>]> = BTreeMap::new();
        logs.insert(1, &log_a);
        logs.insert(2, &log_b);

        let err = tracker.check(&BTreeMap::new(), &logs).unwrap_err();
        assert_eq!(
            err,
            InvariantViolation::LogDivergence { a: 1, b: 2, position: 1 }
        );
    }

    #[test]
    fn prefix_of_longer_log_is_agreement() {
        let mut tracker = InvariantTracker::new();
        let log_a = vec![vec![1u8]];
        let log_b = vec![vec![1u8], vec![2u8]];
        let mut logs: BTreeMap<NodeId, &[Vec<u8>]> = BTreeMap::new();
        logs.insert(1, &log_a);
        logs.insert(2, &log_b);

        assert!(tracker.check(&BTreeMap::new(), &logs).is_ok());
    }
}
