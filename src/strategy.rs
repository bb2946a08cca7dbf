//! Scheduling strategies and the choice interpreter.
//!
//! A strategy emits one scheduling choice per driver step. The
//! `StepInterpreter` is the deterministic automaton that turns the choice
//! stream into harness actions, so a replayed prefix reproduces exactly
//! the actions of its parent execution, and a mutated stream with
//! out-of-place draws degrades gracefully (the misfit draw is marked
//! unconsumed and skipped).
//!
//! Fault injections are spread over consecutive draw choices: a
//! `RandomBoolean{true}` opens a fault, the next integer draw picks the
//! fault kind, and (for targeted faults) one more integer draw picks the
//! node. Each draw is its own trace entry, which keeps trace length equal
//! to the step count and gives mutation operators well-defined targets.

use crate::cluster::ClusterView;
use crate::rng::SimRng;
use crate::trace::{Choice, ChoiceKind, NodeId, Trace};

/// Number of distinct fault kinds the interpreter understands.
const FAULT_KINDS: u64 = 4;

/// A concrete action for the driver to apply through the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// No cluster effect this step (null choice, branch draw, or a
    /// skipped misfit choice).
    Nothing,
    /// Deliver pending messages to the node, then tick it.
    StepNode(NodeId),
    /// Take the node down.
    Crash(NodeId),
    /// Bring a crashed node back from its persisted log.
    Restart(NodeId),
    /// Inject a client proposal at the current leader.
    ClientRequest,
    /// Ask the current leader to hand off leadership.
    TransferLeader { to: NodeId },
}

/// What kind of choice the interpreter can use next. Strategies that
/// generate fresh choices respect this; replayed choices may violate it,
/// in which case the interpreter resynchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceExpectation {
    /// Start of a step: a node schedule or a fault branch.
    Step,
    /// An integer draw in `[0, bound)`.
    Integer { bound: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultKind {
    Crash,
    Restart,
    ClientRequest,
    TransferLeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterpState {
    Idle,
    WantKind,
    WantTarget(FaultKind),
}

/// Deterministic automaton from scheduling choices to harness actions.
#[derive(Debug)]
pub struct StepInterpreter {
    state: InterpState,
}

impl Default for StepInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl StepInterpreter {
    /// Creates an interpreter in the idle state.
    pub fn new() -> Self {
        Self {
            state: InterpState::Idle,
        }
    }

    /// The kind of choice this interpreter can consume next.
    pub fn expects(&self, view: &ClusterView) -> ChoiceExpectation {
        match self.state {
            InterpState::Idle => ChoiceExpectation::Step,
            InterpState::WantKind => ChoiceExpectation::Integer { bound: FAULT_KINDS },
            InterpState::WantTarget(_) => ChoiceExpectation::Integer {
                bound: view.num_nodes,
            },
        }
    }

    /// Consumes one choice, marking it consumed if it fit the automaton,
    /// and returns the action the driver should apply.
    pub fn interpret(&mut self, choice: &mut Choice, view: &ClusterView) -> Action {
        match (self.state, &choice.kind) {
            (InterpState::Idle, ChoiceKind::Node { node }) => {
                choice.consumed = true;
                let node = *node;
                if node == 0 || node > view.num_nodes {
                    Action::Nothing
                } else {
                    Action::StepNode(node)
                }
            }
            (InterpState::Idle, ChoiceKind::RandomBoolean { value }) => {
                choice.consumed = true;
                if *value {
                    self.state = InterpState::WantKind;
                }
                Action::Nothing
            }
            (InterpState::WantKind, ChoiceKind::RandomInteger { value, .. }) => {
                choice.consumed = true;
                match value % FAULT_KINDS {
                    0 => {
                        self.state = InterpState::WantTarget(FaultKind::Crash);
                        Action::Nothing
                    }
                    1 => {
                        self.state = InterpState::WantTarget(FaultKind::Restart);
                        Action::Nothing
                    }
                    2 => {
                        self.state = InterpState::Idle;
                        Action::ClientRequest
                    }
                    _ => {
                        self.state = InterpState::WantTarget(FaultKind::TransferLeader);
                        Action::Nothing
                    }
                }
            }
            (InterpState::WantTarget(kind), ChoiceKind::RandomInteger { value, .. }) => {
                choice.consumed = true;
                self.state = InterpState::Idle;
                let node = 1 + value % view.num_nodes.max(1);
                match kind {
                    FaultKind::Crash => Action::Crash(node),
                    FaultKind::Restart => Action::Restart(node),
                    FaultKind::TransferLeader => Action::TransferLeader { to: node },
                    // Unreachable by construction; kept total.
                    FaultKind::ClientRequest => Action::ClientRequest,
                }
            }
            // Misfit choice for the current state: leave it unconsumed,
            // abandon the half-built fault, and do nothing this step.
            _ => {
                choice.consumed = false;
                self.state = InterpState::Idle;
                Action::Nothing
            }
        }
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Emits the next scheduling choice given the cluster view and what the
/// interpreter can consume.
pub trait Strategy {
    fn next(&mut self, view: &ClusterView, expects: ChoiceExpectation) -> Choice;
}

/// The uniform baseline: ticks a uniformly drawn node (possibly the null
/// action) and opens a fault branch with fixed probability.
#[derive(Debug)]
pub struct RandomStrategy {
    rng: SimRng,
    fault_probability: f64,
}

impl RandomStrategy {
    /// Creates a random strategy drawing from its own forked stream.
    pub fn new(rng: SimRng, fault_probability: f64) -> Self {
        Self {
            rng,
            fault_probability,
        }
    }
}

impl Strategy for RandomStrategy {
    fn next(&mut self, view: &ClusterView, expects: ChoiceExpectation) -> Choice {
        match expects {
            ChoiceExpectation::Step => {
                if self.rng.next_bool_with_probability(self.fault_probability) {
                    Choice::random_boolean(true)
                } else {
                    // 0..=num_nodes, with 0 the null action.
                    let node = self.rng.next_u64_range(0, view.num_nodes + 1);
                    Choice::node(node)
                }
            }
            ChoiceExpectation::Integer { bound } => {
                let bound = bound.max(1);
                Choice::random_integer(self.rng.next_u64_range(0, bound), bound)
            }
        }
    }
}

/// Replay-with-tail: reproduces a parent trace choice by choice, then
/// falls through to the inner strategy for the rest of the horizon.
#[derive(Debug)]
pub struct ReplayStrategy<S> {
    parent: Trace,
    cursor: usize,
    tail: S,
}

impl<S: Strategy> ReplayStrategy<S> {
    /// Creates a replaying strategy over `parent` with `tail` as the
    /// fallback generator.
    pub fn new(parent: Trace, tail: S) -> Self {
        Self {
            parent,
            cursor: 0,
            tail,
        }
    }

    /// Number of parent choices replayed so far.
    pub fn replayed(&self) -> usize {
        self.cursor
    }
}

impl<S: Strategy> Strategy for ReplayStrategy<S> {
    fn next(&mut self, view: &ClusterView, expects: ChoiceExpectation) -> Choice {
        if let Some(choice) = self.parent.get(self.cursor) {
            self.cursor += 1;
            let mut choice = choice.clone();
            // Consumption is re-decided by this execution's interpreter.
            choice.consumed = false;
            choice
        } else {
            self.tail.next(view, expects)
        }
    }
}
