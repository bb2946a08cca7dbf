//! # tlcfuzz: coverage-guided fuzzing of a raft cluster against a formal model
//!
//! This crate closes the loop between empirical execution and formal
//! model checking. It drives an in-process raft cluster through a
//! controllable single-threaded scheduler, extracts an abstract event
//! trace from the execution, ships the trace to a TLC-style model server,
//! and uses the count of newly discovered abstract states as feedback for
//! mutating scheduling decisions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Fuzzer driver                          │
//! │   parent queue ──▶ strategy ──▶ cluster harness ──▶ events    │
//! │        ▲                                             │        │
//! │        │                                             ▼        │
//! │    mutator ◀── coverage gain ◀── guider ◀── model checker     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - The **cluster harness** owns N `raft::RawNode` instances, their
//!   in-memory storage, and every in-flight message. Nothing runs unless
//!   a scheduling choice drives it; given a seed the whole campaign is
//!   deterministic.
//! - The **trace** records every scheduling choice; the **event trace**
//!   records the consensus-level occurrences the execution produced.
//! - The **guider** converts the model server's verdict into a numeric
//!   reward; the **mutator** spawns trace variants for rewarded traces.
//!
//! ## Quick start
//!
//! ```ignore
//! use tlcfuzz::{CombinedMutator, Fuzzer, FuzzerConfig, TlcClient, TlcStateGuider};
//! use std::time::Duration;
//!
//! let config = FuzzerConfig::default().with_seed(42).with_iterations(1000);
//! let checker = TlcClient::new("http://127.0.0.1:2023", Duration::from_secs(5));
//! let mut fuzzer = Fuzzer::new(config, TlcStateGuider::new(checker), CombinedMutator::new());
//! let report = fuzzer.run()?;
//! println!("coverage: {}", report.final_coverage);
//! ```

// Simulation statistics intentionally use lossy float conversions.
#![allow(clippy::cast_precision_loss)]

pub mod checker;
pub mod cluster;
mod error;
pub mod events;
pub mod fuzzer;
pub mod guider;
pub mod invariant;
pub mod mutator;
pub mod queue;
mod rng;
pub mod strategy;
pub mod trace;

pub use checker::{AbstractState, ModelChecker, TlcClient};
pub use cluster::{ClusterConfig, ClusterHarness, ClusterView};
pub use error::FuzzError;
pub use events::{diff_events, ReadySummary, Role, StatusSnapshot};
pub use fuzzer::{
    run_compare_cell, CampaignReport, Fuzzer, FuzzerConfig, GuiderKind, IterationOutcome,
    MutatorKind, COMPARE_MATRIX,
};
pub use guider::{CoverageGain, Guider, TlcStateGuider, TraceCoverageGuider};
pub use invariant::{InvariantTracker, InvariantViolation};
pub use mutator::{
    BumpIntegerMutator, CombinedMutator, EmptyMutator, FlipBooleanMutator, IdentityMutator,
    Mutator, SwapNodesMutator, TruncateMutator,
};
pub use queue::MessageQueue;
pub use rng::SimRng;
pub use strategy::{
    Action, ChoiceExpectation, RandomStrategy, ReplayStrategy, StepInterpreter, Strategy,
};
pub use trace::{
    default_copy_filter, Choice, ChoiceKind, CopyFilter, Event, EventTrace, NodeId, Trace,
};
