//! Client for the formal-model server.
//!
//! The server replays an abstract event trace through its state-space
//! exploration and reports which abstract states the trace visited.
//! Failures here are loud: an unreachable server or a malformed reply is
//! fatal for the iteration, never silently "no new states".

use crate::error::FuzzError;
use crate::trace::EventTrace;
use serde::Deserialize;
use std::time::Duration;

/// One abstract state visited by the model. Only `key` participates in
/// coverage set membership; `repr` is kept for debugging and records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbstractState {
    pub repr: String,
    pub key: i64,
}

/// Anything that can score an event trace against a formal model.
pub trait ModelChecker {
    /// Replays the event trace and returns the abstract states it
    /// visited, in visit order.
    fn execute(&self, events: &EventTrace) -> Result<Vec<AbstractState>, FuzzError>;
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(rename = "States")]
    states: Vec<String>,
    #[serde(rename = "Keys")]
    keys: Vec<i64>,
}

/// HTTP client for a TLC-style model server speaking `POST {base}/execute`.
pub struct TlcClient {
    agent: ureq::Agent,
    base: String,
}

impl TlcClient {
    /// Creates a client for the server at `base` (e.g.
    /// `http://127.0.0.1:2023`) with a per-request deadline.
    pub fn new(base: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base: base.into().trim_end_matches('/').to_string(),
        }
    }
}

impl ModelChecker for TlcClient {
    fn execute(&self, events: &EventTrace) -> Result<Vec<AbstractState>, FuzzError> {
        let body = events.to_wire_json()?;
        let url = format!("{}/execute", self.base);
        let response = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|e| FuzzError::Transport(e.to_string()))?;
        let text = response
            .into_string()
            .map_err(|e| FuzzError::Transport(e.to_string()))?;
        let parsed: ExecuteResponse =
            serde_json::from_str(&text).map_err(|e| FuzzError::Protocol(e.to_string()))?;
        if parsed.states.len() != parsed.keys.len() {
            return Err(FuzzError::Protocol(format!(
                "mismatched arrays: {} states vs {} keys",
                parsed.states.len(),
                parsed.keys.len()
            )));
        }
        Ok(parsed
            .states
            .into_iter()
            .zip(parsed.keys)
            .map(|(repr, key)| AbstractState { repr, key })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parsing_pairs_states_with_keys() {
        let text = r#"{ "States": ["s0", "s1"], "Keys": [12, -7] }"#;
        let parsed: ExecuteResponse = serde_json::from_str(text).unwrap();
        assert_eq!(parsed.states, vec!["s0", "s1"]);
        assert_eq!(parsed.keys, vec![12, -7]);
    }

    #[test]
    fn mismatched_arrays_are_a_protocol_error() {
        // Exercise the length check through a checker that never touches
        // the network.
        struct Mismatched;
        impl ModelChecker for Mismatched {
            fn execute(&self, _events: &EventTrace) -> Result<Vec<AbstractState>, FuzzError> {
                let parsed: ExecuteResponse =
                    serde_json::from_str(r#"{ "States": ["s0"], "Keys": [] }"#).unwrap();
                if parsed.states.len() != parsed.keys.len() {
                    return Err(FuzzError::Protocol("mismatched arrays".to_string()));
                }
                Ok(Vec::new())
            }
        }

        let err = Mismatched.execute(&EventTrace::new()).unwrap_err();
        assert!(matches!(err, FuzzError::Protocol(_)));
    }

    #[test]
    fn unreachable_server_is_a_transport_error() {
        // Reserved port with nothing listening; the connect fails fast.
        let client = TlcClient::new("http://127.0.0.1:1", Duration::from_millis(200));
        let err = client.execute(&EventTrace::new()).unwrap_err();
        assert!(matches!(err, FuzzError::Transport(_)));
    }
}
