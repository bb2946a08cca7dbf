//! Coverage guidance: translating model verdicts into numeric reward.
//!
//! A guider owns the campaign's cumulative coverage. The set of abstract
//! state keys only ever grows; the per-iteration reward is the number of
//! keys the iteration contributed. Keys are assumed unstable across
//! model-server restarts, so coverage is never persisted between
//! campaigns.

use crate::checker::{AbstractState, ModelChecker};
use crate::error::FuzzError;
use crate::trace::{EventTrace, Trace};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of scoring one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageGain {
    /// Abstract states this iteration saw for the first time.
    pub new_states: usize,
    /// `new_states` relative to the coverage before this iteration.
    pub gain: f64,
}

impl CoverageGain {
    fn none() -> Self {
        Self {
            new_states: 0,
            gain: 0.0,
        }
    }
}

/// Scores executed traces and tracks cumulative campaign coverage.
pub trait Guider {
    /// Scores one (trace, event trace) pair. Deterministic re-executions
    /// of an already-scored event trace return zero without consulting
    /// the model.
    fn check(&mut self, trace: &Trace, events: &EventTrace) -> Result<CoverageGain, FuzzError>;

    /// Cumulative coverage: distinct abstract states (or, for the local
    /// guider, distinct event traces) seen this campaign.
    fn coverage(&self) -> usize;
}

/// On-disk record of a retained trace, keyed by the event-trace hash.
#[derive(Serialize)]
struct TraceRecord<'a> {
    choices: &'a Trace,
    events: &'a EventTrace,
    states: Vec<&'a str>,
    keys: Vec<i64>,
}

fn persist_record(
    dir: &Path,
    hash: &str,
    trace: &Trace,
    events: &EventTrace,
    states: &[AbstractState],
) -> Result<(), FuzzError> {
    fs::create_dir_all(dir)?;
    let record = TraceRecord {
        choices: trace,
        events,
        states: states.iter().map(|s| s.repr.as_str()).collect(),
        keys: states.iter().map(|s| s.key).collect(),
    };
    let path = dir.join(format!("{hash}.json"));
    fs::write(path, serde_json::to_vec_pretty(&record)?)?;
    Ok(())
}

// ============================================================================
// TLC-State Guider
// ============================================================================

/// The model-backed guider: coverage is the set of abstract state keys
/// the formal model reported across the campaign.
pub struct TlcStateGuider<C> {
    checker: C,
    states: HashSet<i64>,
    trace_hashes: HashSet<String>,
    record_dir: Option<PathBuf>,
}

impl<C: ModelChecker> TlcStateGuider<C> {
    /// Creates a guider over the given checker.
    pub fn new(checker: C) -> Self {
        Self {
            checker,
            states: HashSet::new(),
            trace_hashes: HashSet::new(),
            record_dir: None,
        }
    }

    /// Persists every scored trace under `dir`, keyed by hash.
    pub fn with_record_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_dir = Some(dir.into());
        self
    }

    /// Number of distinct event traces scored so far.
    pub fn distinct_traces(&self) -> usize {
        self.trace_hashes.len()
    }
}

impl<C: ModelChecker> Guider for TlcStateGuider<C> {
    fn check(&mut self, trace: &Trace, events: &EventTrace) -> Result<CoverageGain, FuzzError> {
        let hash = events.canonical_hash();
        if !self.trace_hashes.insert(hash.clone()) {
            return Ok(CoverageGain::none());
        }

        let visited = self.checker.execute(events)?;
        let before = self.states.len();
        let mut new_states = 0;
        for state in &visited {
            if self.states.insert(state.key) {
                new_states += 1;
            }
        }
        let gain = new_states as f64 / before.max(1) as f64;

        if let Some(dir) = &self.record_dir {
            persist_record(dir, &hash, trace, events, &visited)?;
        }

        Ok(CoverageGain { new_states, gain })
    }

    fn coverage(&self) -> usize {
        self.states.len()
    }
}

// ============================================================================
// Trace-Coverage Guider
// ============================================================================

/// The local baseline guider: coverage is simply the set of distinct
/// event-trace hashes, with no model server in the loop.
#[derive(Default)]
pub struct TraceCoverageGuider {
    trace_hashes: HashSet<String>,
    record_dir: Option<PathBuf>,
}

impl TraceCoverageGuider {
    /// Creates an empty local guider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists every newly seen trace under `dir`, keyed by hash.
    pub fn with_record_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_dir = Some(dir.into());
        self
    }
}

impl Guider for TraceCoverageGuider {
    fn check(&mut self, trace: &Trace, events: &EventTrace) -> Result<CoverageGain, FuzzError> {
        let hash = events.canonical_hash();
        let before = self.trace_hashes.len();
        if !self.trace_hashes.insert(hash.clone()) {
            return Ok(CoverageGain::none());
        }
        if let Some(dir) = &self.record_dir {
            persist_record(dir, &hash, trace, events, &[])?;
        }
        Ok(CoverageGain {
            new_states: 1,
            gain: 1.0 / before.max(1) as f64,
        })
    }

    fn coverage(&self) -> usize {
        self.trace_hashes.len()
    }
}

impl Guider for Box<dyn Guider> {
    fn check(&mut self, trace: &Trace, events: &EventTrace) -> Result<CoverageGain, FuzzError> {
        self.as_mut().check(trace, events)
    }

    fn coverage(&self) -> usize {
        self.as_ref().coverage()
    }
}
