//! Error types for the fuzzing campaign.
//!
//! The error policy is deliberately asymmetric: transport and invariant
//! failures are loud and fatal to the campaign, consensus-library step
//! errors are swallowed at the harness boundary (their absence from the
//! event trace is itself signal), and mutation failures are local and
//! retried by the driver.

use crate::invariant::InvariantViolation;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal campaign errors.
#[derive(Debug, Error)]
pub enum FuzzError {
    /// Invalid configuration detected at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The model-checking server could not be reached or timed out.
    #[error("model checker transport failure: {0}")]
    Transport(String),

    /// The model-checking server replied with something unparseable.
    #[error("malformed model checker response: {0}")]
    Protocol(String),

    /// Creating or restarting a consensus node failed outright. Distinct
    /// from per-step library errors, which are swallowed.
    #[error("consensus node setup failed: {0}")]
    NodeSetup(String),

    /// A consensus invariant was violated during execution.
    #[error("{violation}")]
    Invariant {
        violation: InvariantViolation,
        /// Where the offending trace was persisted, when recording is on.
        trace_path: Option<PathBuf>,
    },

    /// Two executions of the same trace diverged.
    #[error("nondeterministic execution detected in iteration {iteration}")]
    Determinism { iteration: u64 },

    /// Artifact persistence failed.
    #[error("artifact i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact or wire serialization failed.
    #[error("serialization failure: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<InvariantViolation> for FuzzError {
    fn from(violation: InvariantViolation) -> Self {
        Self::Invariant {
            violation,
            trace_path: None,
        }
    }
}
