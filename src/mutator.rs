//! Mutation operators over scheduling traces.
//!
//! A mutator takes a parent trace (and the event trace it produced) and
//! returns a variant, or `None` when the trace has no candidate position
//! for the chosen operator; the driver then falls back to a fresh random
//! trace. Operators never mutate the parent in place: children are deep
//! copies.

use crate::rng::SimRng;
use crate::trace::{ChoiceKind, EventTrace, Trace};

/// Produces variant traces from a parent.
pub trait Mutator {
    /// Returns a mutated deep copy of `trace`, or `None` when the trace
    /// is too short for the sampled operator.
    fn mutate(
        &mut self,
        trace: &Trace,
        events: &EventTrace,
        rng: &mut SimRng,
    ) -> Option<Trace>;
}

fn positions_of(trace: &Trace, pred: fn(&ChoiceKind) -> bool) -> Vec<usize> {
    trace
        .iter()
        .enumerate()
        .filter(|(_, c)| pred(&c.kind))
        .map(|(i, _)| i)
        .collect()
}

// ============================================================================
// Operators
// ============================================================================

/// Swaps two node-scheduling entries at random positions. Preserves
/// length and the multiset of choices.
#[derive(Debug, Default)]
pub struct SwapNodesMutator;

impl Mutator for SwapNodesMutator {
    fn mutate(&mut self, trace: &Trace, _events: &EventTrace, rng: &mut SimRng) -> Option<Trace> {
        let nodes = positions_of(trace, |k| matches!(k, ChoiceKind::Node { .. }));
        if nodes.len() < 2 {
            return None;
        }
        let a = nodes[rng.next_usize(nodes.len())];
        let mut b = nodes[rng.next_usize(nodes.len())];
        if a == b {
            b = nodes[(nodes.iter().position(|p| *p == a).unwrap_or(0) + 1) % nodes.len()];
        }
        let mut child = trace.clone();
        child.choices_mut().swap(a, b);
        Some(child)
    }
}

/// Inverts one boolean draw.
#[derive(Debug, Default)]
pub struct FlipBooleanMutator;

impl Mutator for FlipBooleanMutator {
    fn mutate(&mut self, trace: &Trace, _events: &EventTrace, rng: &mut SimRng) -> Option<Trace> {
        let bools = positions_of(trace, |k| matches!(k, ChoiceKind::RandomBoolean { .. }));
        if bools.is_empty() {
            return None;
        }
        let at = bools[rng.next_usize(bools.len())];
        let mut child = trace.clone();
        if let ChoiceKind::RandomBoolean { value } = &mut child.choices_mut()[at].kind {
            *value = !*value;
        }
        Some(child)
    }
}

/// Resamples one integer draw uniformly within its original bound.
#[derive(Debug, Default)]
pub struct BumpIntegerMutator;

impl Mutator for BumpIntegerMutator {
    fn mutate(&mut self, trace: &Trace, _events: &EventTrace, rng: &mut SimRng) -> Option<Trace> {
        let ints = positions_of(trace, |k| matches!(k, ChoiceKind::RandomInteger { .. }));
        if ints.is_empty() {
            return None;
        }
        let at = ints[rng.next_usize(ints.len())];
        let mut child = trace.clone();
        if let ChoiceKind::RandomInteger { value, bound } = &mut child.choices_mut()[at].kind {
            *value = rng.next_u64_range(0, (*bound).max(1));
        }
        Some(child)
    }
}

/// Cuts a random non-empty suffix; the driver refills the horizon with
/// its random tail strategy.
#[derive(Debug, Default)]
pub struct TruncateMutator;

impl Mutator for TruncateMutator {
    fn mutate(&mut self, trace: &Trace, _events: &EventTrace, rng: &mut SimRng) -> Option<Trace> {
        if trace.len() < 2 {
            return None;
        }
        let keep = 1 + rng.next_usize(trace.len() - 1);
        let mut child = trace.clone();
        child.truncate(keep);
        Some(child)
    }
}

/// Baseline control: returns the parent unchanged.
#[derive(Debug, Default)]
pub struct IdentityMutator;

impl Mutator for IdentityMutator {
    fn mutate(&mut self, trace: &Trace, _events: &EventTrace, _rng: &mut SimRng) -> Option<Trace> {
        Some(trace.clone())
    }
}

// ============================================================================
// Composite and Empty
// ============================================================================

/// Samples one operator per call with fixed weights.
#[derive(Debug, Default)]
pub struct CombinedMutator {
    swap: SwapNodesMutator,
    flip: FlipBooleanMutator,
    bump: BumpIntegerMutator,
    truncate: TruncateMutator,
    identity: IdentityMutator,
}

/// Sampling weights: (swap, flip, bump, truncate, identity).
const COMBINED_WEIGHTS: [u64; 5] = [4, 2, 2, 2, 1];

impl CombinedMutator {
    /// Creates the composite mutator with the default weights.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mutator for CombinedMutator {
    fn mutate(&mut self, trace: &Trace, events: &EventTrace, rng: &mut SimRng) -> Option<Trace> {
        let total: u64 = COMBINED_WEIGHTS.iter().sum();
        let mut draw = rng.next_u64_range(0, total);
        let mut op = 0;
        for (i, weight) in COMBINED_WEIGHTS.iter().enumerate() {
            if draw < *weight {
                op = i;
                break;
            }
            draw -= weight;
        }
        match op {
            0 => self.swap.mutate(trace, events, rng),
            1 => self.flip.mutate(trace, events, rng),
            2 => self.bump.mutate(trace, events, rng),
            3 => self.truncate.mutate(trace, events, rng),
            _ => self.identity.mutate(trace, events, rng),
        }
    }
}

/// The no-mutation baseline: every child is an identity copy. Together
/// with execution determinism and guider dedup, a campaign under this
/// mutator degrades to pure random exploration.
#[derive(Debug, Default)]
pub struct EmptyMutator;

impl Mutator for EmptyMutator {
    fn mutate(&mut self, trace: &Trace, _events: &EventTrace, _rng: &mut SimRng) -> Option<Trace> {
        Some(trace.clone())
    }
}

impl Mutator for Box<dyn Mutator> {
    fn mutate(&mut self, trace: &Trace, events: &EventTrace, rng: &mut SimRng) -> Option<Trace> {
        self.as_mut().mutate(trace, events, rng)
    }
}
