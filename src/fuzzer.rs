//! The campaign driver: the outer coverage-guided fuzzing loop.
//!
//! Per iteration: pop a parent trace (empty when the queue is dry), reset
//! the cluster, run the replay-then-random strategy for the horizon,
//! score the event trace through the guider, and on positive reward
//! enqueue mutated children. All randomness flows from the campaign seed;
//! with a deterministic model checker the whole campaign is reproducible
//! byte for byte.

use crate::cluster::{ClusterConfig, ClusterHarness};
use crate::error::FuzzError;
use crate::guider::Guider;
use crate::mutator::Mutator;
use crate::rng::SimRng;
use crate::strategy::{Action, RandomStrategy, ReplayStrategy, StepInterpreter, Strategy};
use crate::trace::{default_copy_filter, EventTrace, Trace};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Campaign parameters.
#[derive(Debug, Clone)]
pub struct FuzzerConfig {
    /// Iterations to run.
    pub iterations: u64,
    /// Maximum scheduling choices per iteration.
    pub horizon: usize,
    /// Mutants spawned per newly discovered state.
    pub mutations_per_trace: usize,
    /// Campaign seed.
    pub seed: u64,
    /// Probability that a step opens a fault branch instead of a tick.
    pub fault_probability: f64,
    /// Cluster shape and timers.
    pub cluster: ClusterConfig,
    /// Where to persist the offending trace on invariant violation.
    pub violation_dir: Option<PathBuf>,
    /// Execute every trace twice and compare event traces.
    pub check_determinism: bool,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            iterations: 1000,
            horizon: 100,
            mutations_per_trace: 5,
            seed: 0,
            fault_probability: 0.1,
            cluster: ClusterConfig::default(),
            violation_dir: None,
            check_determinism: false,
        }
    }
}

impl FuzzerConfig {
    /// Sets the campaign seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the iteration count.
    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    /// Sets the per-iteration horizon.
    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    /// Sets the mutants-per-new-state factor.
    pub fn with_mutations_per_trace(mut self, m: usize) -> Self {
        self.mutations_per_trace = m;
        self
    }

    /// Sets the cluster configuration.
    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = cluster;
        self
    }

    /// Sets where offending traces are persisted on invariant violation.
    pub fn with_violation_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.violation_dir = dir;
        self
    }

    /// Enables the per-iteration determinism self-check.
    pub fn with_determinism_check(mut self) -> Self {
        self.check_determinism = true;
        self
    }
}

// ============================================================================
// Reporting
// ============================================================================

/// Outcome of one iteration, for the coverage-over-time series.
#[derive(Debug, Clone, Serialize)]
pub struct IterationOutcome {
    pub iteration: u64,
    pub new_states: usize,
    pub coverage: usize,
    pub trace_len: usize,
    pub events_len: usize,
}

/// Summary of a completed campaign.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub seed: u64,
    pub outcomes: Vec<IterationOutcome>,
    pub final_coverage: usize,
}

impl CampaignReport {
    /// Cumulative coverage after each iteration.
    pub fn coverage_series(&self) -> Vec<usize> {
        self.outcomes.iter().map(|o| o.coverage).collect()
    }

    /// Writes the per-iteration series as CSV.
    pub fn write_csv(&self, path: &Path) -> Result<(), FuzzError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        writeln!(file, "iteration,new_states,cumulative_states")?;
        for outcome in &self.outcomes {
            writeln!(
                file,
                "{},{},{}",
                outcome.iteration, outcome.new_states, outcome.coverage
            )?;
        }
        Ok(())
    }
}

// ============================================================================
// Fuzzer
// ============================================================================

/// The coverage-guided fuzzing driver.
pub struct Fuzzer<G, M> {
    config: FuzzerConfig,
    guider: G,
    mutator: M,
    queue: VecDeque<Trace>,
    rng: SimRng,
}

impl<G: Guider, M: Mutator> Fuzzer<G, M> {
    /// Creates a driver over the given guider and mutator.
    pub fn new(config: FuzzerConfig, guider: G, mutator: M) -> Self {
        let rng = SimRng::new(config.seed);
        Self {
            config,
            guider,
            mutator,
            queue: VecDeque::new(),
            rng,
        }
    }

    /// Runs the full campaign.
    pub fn run(&mut self) -> Result<CampaignReport, FuzzError> {
        info!(
            seed = self.config.seed,
            iterations = self.config.iterations,
            horizon = self.config.horizon,
            "starting campaign"
        );
        let mut outcomes = Vec::with_capacity(self.config.iterations as usize);
        for iteration in 0..self.config.iterations {
            outcomes.push(self.run_iteration(iteration)?);
        }
        let report = CampaignReport {
            seed: self.config.seed,
            final_coverage: self.guider.coverage(),
            outcomes,
        };
        info!(coverage = report.final_coverage, "campaign finished");
        Ok(report)
    }

    fn run_iteration(&mut self, iteration: u64) -> Result<IterationOutcome, FuzzError> {
        let parent = self.queue.pop_front().unwrap_or_default();
        let (trace, events) = self.execute(&parent)?;

        if self.config.check_determinism {
            let (_replayed, replayed_events) = self.execute(&trace)?;
            if replayed_events != events {
                return Err(FuzzError::Determinism { iteration });
            }
        }

        let gain = self.guider.check(&trace, &events)?;
        if gain.new_states > 0 {
            debug!(
                iteration,
                new_states = gain.new_states,
                gain = gain.gain,
                "new coverage"
            );
            for _ in 0..gain.new_states * self.config.mutations_per_trace {
                match self.mutator.mutate(&trace, &events, &mut self.rng) {
                    Some(child) => self
                        .queue
                        .push_back(child.filtered_copy(default_copy_filter)),
                    // Mutation failed locally; fall back to a fresh
                    // random trace.
                    None => self.queue.push_back(Trace::new()),
                }
            }
        }

        Ok(IterationOutcome {
            iteration,
            new_states: gain.new_states,
            coverage: self.guider.coverage(),
            trace_len: trace.len(),
            events_len: events.len(),
        })
    }

    /// Executes one trace against a fresh cluster: replay the parent,
    /// then extend randomly up to the horizon. Returns the recorded
    /// trace and the event trace it produced.
    pub fn execute(&mut self, parent: &Trace) -> Result<(Trace, EventTrace), FuzzError> {
        let mut cluster = ClusterHarness::new(self.config.cluster.clone())?;
        let tail = RandomStrategy::new(self.rng.fork(), self.config.fault_probability);
        let mut strategy = ReplayStrategy::new(parent.clone(), tail);
        let mut interpreter = StepInterpreter::new();
        let mut trace = Trace::new();
        // Request ids restart every iteration so a replayed prefix
        // injects the same proposals as its parent run.
        let mut next_request = 0u64;

        for _ in 0..self.config.horizon {
            let view = cluster.view();
            let mut choice = strategy.next(&view, interpreter.expects(&view));
            let action = interpreter.interpret(&mut choice, &view);
            match action {
                Action::Nothing => {}
                Action::StepNode(node) => cluster.step_node(node),
                Action::Crash(node) => cluster.crash(node),
                Action::Restart(node) => cluster.restart(node)?,
                Action::ClientRequest => {
                    next_request += 1;
                    cluster.client_request(next_request);
                }
                Action::TransferLeader { to } => {
                    if let Some(from) = view.leader {
                        cluster.transfer_leader(from, to);
                    }
                }
            }
            trace.push(choice);

            if let Err(violation) = cluster.check_invariants() {
                warn!(%violation, "invariant violated, aborting campaign");
                let trace_path = self.persist_violation(&trace, cluster.events());
                return Err(FuzzError::Invariant {
                    violation,
                    trace_path,
                });
            }
        }

        Ok((trace, cluster.take_events()))
    }

    /// Persists the offending trace, returning where it landed so the
    /// campaign error can carry the path.
    fn persist_violation(&self, trace: &Trace, events: &EventTrace) -> Option<PathBuf> {
        let dir = self.config.violation_dir.as_ref()?;
        #[derive(Serialize)]
        struct Offending<'a> {
            choices: &'a Trace,
            events: &'a EventTrace,
        }
        let dump = || -> Result<PathBuf, FuzzError> {
            fs::create_dir_all(dir)?;
            let path = dir.join(format!("violation-{}.json", events.canonical_hash()));
            fs::write(
                &path,
                serde_json::to_vec_pretty(&Offending { choices: trace, events })?,
            )?;
            Ok(path)
        };
        match dump() {
            Ok(path) => {
                warn!(path = %path.display(), "offending trace persisted");
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, "failed to persist offending trace");
                None
            }
        }
    }

    /// The guider, for post-campaign inspection.
    pub fn guider(&self) -> &G {
        &self.guider
    }

    /// Number of queued mutant traces.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

// ============================================================================
// Comparison Mode
// ============================================================================

/// One cell of the comparison matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuiderKind {
    /// Model-server-backed abstract-state coverage.
    TlcState,
    /// Local event-trace novelty, no server.
    Random,
}

/// Mutator axis of the comparison matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutatorKind {
    Combined,
    Empty,
}

impl GuiderKind {
    pub fn label(self) -> &'static str {
        match self {
            GuiderKind::TlcState => "tlcstate",
            GuiderKind::Random => "random",
        }
    }
}

impl MutatorKind {
    pub fn label(self) -> &'static str {
        match self {
            MutatorKind::Combined => "combined",
            MutatorKind::Empty => "empty",
        }
    }
}

/// The full comparison matrix, in deterministic order.
pub const COMPARE_MATRIX: [(GuiderKind, MutatorKind); 4] = [
    (GuiderKind::TlcState, MutatorKind::Combined),
    (GuiderKind::TlcState, MutatorKind::Empty),
    (GuiderKind::Random, MutatorKind::Combined),
    (GuiderKind::Random, MutatorKind::Empty),
];

/// Runs one comparison cell with the shared seed and writes its coverage
/// series under `out_dir`.
pub fn run_compare_cell(
    config: &FuzzerConfig,
    guider: Box<dyn Guider>,
    mutator_kind: MutatorKind,
    label: &str,
    out_dir: &Path,
) -> Result<CampaignReport, FuzzError> {
    let mutator: Box<dyn Mutator> = match mutator_kind {
        MutatorKind::Combined => Box::new(crate::mutator::CombinedMutator::new()),
        MutatorKind::Empty => Box::new(crate::mutator::EmptyMutator),
    };
    info!(cell = label, "running comparison cell");
    let mut fuzzer = Fuzzer::new(config.clone(), guider, mutator);
    let report = fuzzer.run()?;
    report.write_csv(&out_dir.join(format!("{label}.csv")))?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{AbstractState, ModelChecker};
    use crate::guider::TlcStateGuider;
    use crate::mutator::CombinedMutator;

    /// Deterministic stand-in for the model server: states are a pure
    /// function of the event trace.
    struct HashChecker;

    impl ModelChecker for HashChecker {
        fn execute(&self, events: &EventTrace) -> Result<Vec<AbstractState>, FuzzError> {
            let hash = events.canonical_hash();
            let states = hash
                .as_bytes()
                .chunks(16)
                .take(2)
                .map(|chunk| {
                    let mut key = 0i64;
                    for b in chunk {
                        key = key.wrapping_mul(31).wrapping_add(*b as i64);
                    }
                    AbstractState {
                        repr: hex::encode(chunk),
                        key,
                    }
                })
                .collect();
            Ok(states)
        }
    }

    fn small_config(seed: u64) -> FuzzerConfig {
        FuzzerConfig::default()
            .with_seed(seed)
            .with_iterations(8)
            .with_horizon(30)
            .with_mutations_per_trace(2)
    }

    #[test]
    fn campaign_coverage_is_monotone() {
        let mut fuzzer = Fuzzer::new(
            small_config(11),
            TlcStateGuider::new(HashChecker),
            CombinedMutator::new(),
        );
        let report = fuzzer.run().unwrap();
        let series = report.coverage_series();
        assert!(series.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(report.final_coverage, *series.last().unwrap());
    }

    #[test]
    fn every_trace_respects_the_horizon() {
        let mut fuzzer = Fuzzer::new(
            small_config(13),
            TlcStateGuider::new(HashChecker),
            CombinedMutator::new(),
        );
        let report = fuzzer.run().unwrap();
        for outcome in &report.outcomes {
            assert!(outcome.trace_len <= 30);
        }
    }

    #[test]
    fn same_seed_same_campaign() {
        let run = |seed| {
            let mut fuzzer = Fuzzer::new(
                small_config(seed),
                TlcStateGuider::new(HashChecker),
                CombinedMutator::new(),
            );
            fuzzer.run().unwrap().coverage_series()
        };
        assert_eq!(run(17), run(17));
    }

    #[test]
    fn replaying_a_full_trace_reproduces_its_events() {
        let mut fuzzer = Fuzzer::new(
            small_config(19),
            TlcStateGuider::new(HashChecker),
            CombinedMutator::new(),
        );
        let (trace, events) = fuzzer.execute(&Trace::new()).unwrap();
        let (_, replayed) = fuzzer.execute(&trace).unwrap();
        assert_eq!(events, replayed);
    }

    #[test]
    fn determinism_self_check_passes() {
        let config = small_config(23).with_determinism_check();
        let mut fuzzer = Fuzzer::new(
            config,
            TlcStateGuider::new(HashChecker),
            CombinedMutator::new(),
        );
        fuzzer.run().unwrap();
    }

    #[test]
    fn csv_report_has_one_row_per_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let mut fuzzer = Fuzzer::new(
            small_config(29),
            TlcStateGuider::new(HashChecker),
            CombinedMutator::new(),
        );
        let report = fuzzer.run().unwrap();
        let path = dir.path().join("series.csv");
        report.write_csv(&path).unwrap();

        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "iteration,new_states,cumulative_states");
        assert_eq!(lines.len(), 1 + report.outcomes.len());
    }
}
