//! End-to-end campaign properties with a mocked model server.

use std::collections::BTreeMap;
use tlcfuzz::{
    AbstractState, Choice, ChoiceKind, ClusterConfig, CombinedMutator, EmptyMutator, EventTrace,
    FuzzError, Fuzzer, FuzzerConfig, Guider, InvariantViolation, ModelChecker, Mutator, SimRng,
    SwapNodesMutator, TlcStateGuider, Trace,
};

/// Deterministic model-server stand-in: the states a trace visits are a
/// pure function of its content.
struct HashChecker;

impl ModelChecker for HashChecker {
    fn execute(&self, events: &EventTrace) -> Result<Vec<AbstractState>, FuzzError> {
        let hash = events.canonical_hash();
        Ok(hash
            .as_bytes()
            .chunks(16)
            .take(3)
            .map(|chunk| {
                let mut key = 0i64;
                for b in chunk {
                    key = key.wrapping_mul(131).wrapping_add(*b as i64);
                }
                AbstractState {
                    repr: String::from_utf8_lossy(chunk).into_owned(),
                    key,
                }
            })
            .collect())
    }
}

fn config(seed: u64) -> FuzzerConfig {
    FuzzerConfig::default()
        .with_seed(seed)
        .with_iterations(12)
        .with_horizon(40)
        .with_mutations_per_trace(3)
        .with_cluster(ClusterConfig::default())
}

#[test]
fn same_seed_produces_byte_identical_trace_files_and_series() {
    let run = |dir: &std::path::Path| {
        let guider = TlcStateGuider::new(HashChecker).with_record_dir(dir);
        let mut fuzzer = Fuzzer::new(config(42), guider, CombinedMutator::new());
        fuzzer.run().unwrap().coverage_series()
    };

    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let series_a = run(dir_a.path());
    let series_b = run(dir_b.path());
    assert_eq!(series_a, series_b);

    let files = |dir: &std::path::Path| -> BTreeMap<String, Vec<u8>> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                let name = entry.file_name().into_string().unwrap();
                let contents = std::fs::read(entry.path()).unwrap();
                (name, contents)
            })
            .collect()
    };
    let files_a = files(dir_a.path());
    let files_b = files(dir_b.path());
    assert!(!files_a.is_empty());
    assert_eq!(files_a, files_b);
}

#[test]
fn coverage_is_monotone_across_the_campaign() {
    let mut fuzzer = Fuzzer::new(
        config(7),
        TlcStateGuider::new(HashChecker),
        CombinedMutator::new(),
    );
    let report = fuzzer.run().unwrap();
    let series = report.coverage_series();
    assert!(series.windows(2).all(|w| w[0] <= w[1]));
    assert!(report.final_coverage > 0);
}

#[test]
fn horizon_bounds_every_trace() {
    let mut fuzzer = Fuzzer::new(
        config(5),
        TlcStateGuider::new(HashChecker),
        CombinedMutator::new(),
    );
    let report = fuzzer.run().unwrap();
    assert_eq!(report.outcomes.len(), 12);
    for outcome in &report.outcomes {
        assert!(outcome.trace_len <= 40);
    }
}

#[test]
fn identity_children_replay_their_parent_exactly() {
    let mut fuzzer = Fuzzer::new(
        config(3),
        TlcStateGuider::new(HashChecker),
        EmptyMutator,
    );
    let (trace, events) = fuzzer.execute(&Trace::new()).unwrap();

    let mut child = EmptyMutator
        .mutate(&trace, &events, &mut SimRng::new(0))
        .unwrap();
    assert_eq!(child, trace);

    let (_, replayed_events) = fuzzer.execute(&child).unwrap();
    assert_eq!(replayed_events, events);

    // Copy isolation: scribbling on the child leaves the parent alone.
    child.choices_mut().clear();
    assert!(!trace.is_empty());
}

#[test]
fn guider_dedups_repeated_event_traces() {
    let mut fuzzer = Fuzzer::new(
        config(9),
        TlcStateGuider::new(HashChecker),
        CombinedMutator::new(),
    );
    let (trace, events) = fuzzer.execute(&Trace::new()).unwrap();

    let mut guider = TlcStateGuider::new(HashChecker);
    let first = guider.check(&trace, &events).unwrap();
    assert!(first.new_states > 0);
    let second = guider.check(&trace, &events).unwrap();
    assert_eq!(second.new_states, 0);
    assert_eq!(second.gain, 0.0);
}

#[test]
fn swap_on_generated_traces_preserves_length_and_multiset() {
    let mut fuzzer = Fuzzer::new(
        config(21),
        TlcStateGuider::new(HashChecker),
        CombinedMutator::new(),
    );
    let (trace, events) = fuzzer.execute(&Trace::new()).unwrap();
    assert!(trace.len() >= 2);

    let mut rng = SimRng::new(4);
    let mut swapper = SwapNodesMutator::default();
    for _ in 0..20 {
        let Some(child) = swapper.mutate(&trace, &events, &mut rng) else {
            continue;
        };
        assert_eq!(child.len(), trace.len());

        let sorted = |t: &Trace| -> Vec<String> {
            let mut kinds: Vec<String> = t.iter().map(|c| format!("{:?}", c.kind)).collect();
            kinds.sort();
            kinds
        };
        assert_eq!(sorted(&child), sorted(&trace));
    }
}

/// A hand-built schedule that elects node 1, injects one client request,
/// and replicates it to the followers.
fn election_and_commit_schedule() -> Trace {
    let mut trace = Trace::new();
    for _ in 0..12 {
        trace.push(Choice::node(1));
    }
    for _ in 0..3 {
        for n in [2, 3, 1] {
            trace.push(Choice::node(n));
        }
    }
    trace.push(Choice::random_boolean(true));
    trace.push(Choice::random_integer(2, 4));
    for _ in 0..8 {
        for n in [2, 3, 1] {
            trace.push(Choice::node(n));
        }
    }
    trace
}

#[test]
fn invariant_violation_aborts_the_campaign_and_persists_the_trace() {
    let dir = tempfile::tempdir().unwrap();
    let config = FuzzerConfig::default()
        .with_seed(1)
        .with_iterations(3)
        .with_horizon(60)
        .with_cluster(ClusterConfig::default().with_storage_corruption(2))
        .with_violation_dir(Some(dir.path().to_path_buf()));
    let mut fuzzer = Fuzzer::new(
        config,
        TlcStateGuider::new(HashChecker),
        CombinedMutator::new(),
    );

    let err = fuzzer.execute(&election_and_commit_schedule()).unwrap_err();
    match err {
        FuzzError::Invariant {
            violation,
            trace_path,
        } => {
            assert!(matches!(violation, InvariantViolation::LogDivergence { .. }));

            let path = trace_path.expect("offending trace should be persisted");
            assert!(path.exists());
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with("violation-") && name.ends_with(".json"));

            let contents = std::fs::read_to_string(&path).unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
            assert!(parsed["choices"].is_array());
            assert!(parsed["events"].is_array());
        }
        other => panic!("expected an invariant violation, got {other:?}"),
    }
}

#[test]
fn invariant_violation_without_record_dir_carries_no_path() {
    let config = FuzzerConfig::default()
        .with_seed(1)
        .with_horizon(60)
        .with_cluster(ClusterConfig::default().with_storage_corruption(2));
    let mut fuzzer = Fuzzer::new(
        config,
        TlcStateGuider::new(HashChecker),
        CombinedMutator::new(),
    );

    let err = fuzzer.execute(&election_and_commit_schedule()).unwrap_err();
    match err {
        FuzzError::Invariant { trace_path, .. } => assert!(trace_path.is_none()),
        other => panic!("expected an invariant violation, got {other:?}"),
    }
}

#[test]
fn determinism_check_catches_stochastic_cluster_behavior() {
    // A wide election-timeout window lets the library's own timer
    // randomness through, so a replayed trace stops reproducing its
    // parent's events and the self-check must trip.
    let config = FuzzerConfig::default()
        .with_seed(2)
        .with_iterations(20)
        .with_horizon(150)
        .with_cluster(ClusterConfig::default().with_election_jitter(6))
        .with_determinism_check();
    let mut fuzzer = Fuzzer::new(
        config,
        TlcStateGuider::new(HashChecker),
        CombinedMutator::new(),
    );

    let err = fuzzer.run().unwrap_err();
    assert!(matches!(err, FuzzError::Determinism { .. }));
}

#[test]
fn mutated_children_only_contain_consumed_draws() {
    let mut fuzzer = Fuzzer::new(
        config(31),
        TlcStateGuider::new(HashChecker),
        CombinedMutator::new(),
    );
    let report = fuzzer.run().unwrap();
    assert!(report.final_coverage > 0);

    // Re-execute a fresh random iteration and check the copy-filter
    // contract directly.
    let (trace, _events) = fuzzer.execute(&Trace::new()).unwrap();
    let filtered = trace.filtered_copy(tlcfuzz::default_copy_filter);
    for choice in filtered.iter() {
        match choice.kind {
            ChoiceKind::Node { .. } => {}
            _ => assert!(choice.consumed, "unconsumed draw survived the copy filter"),
        }
    }
}
