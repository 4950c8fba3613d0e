//! Pairwise relay: one shared offer/answer/candidates record
//!
//! Session lifecycle: `Empty -> Offered -> Answered -> Empty (reset)`, with
//! candidates accumulating in any phase. There is no timeout; the record
//! lives until an explicit reset.
//!
//! A plain poll returns only the most recently appended candidate. If two
//! candidates arrive between polls the earlier one is never seen by that
//! poller, and the same candidate is returned repeatedly until a newer one
//! arrives; clients de-duplicate by value. Polling with `since` returns every
//! candidate from that index instead.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use handshake_core::validate::validate_json_payload;
use handshake_core::{ProtocolError, SessionState, SignalKind, ValidationError};

use crate::error::RelayError;
use crate::storage::{transact, Store};

/// Acknowledgement for a submitted signal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

/// Poll result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollReply {
    pub offer: Option<Value>,
    pub answer: Option<Value>,
    /// Most recently appended candidate
    pub candidate: Option<Value>,
    /// Candidates from the requested cursor on (cursor polls only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<Value>>,
    /// Cursor for the next poll (cursor polls only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<usize>,
}

/// Two-party signaling relay
pub struct PairwiseRelay {
    session: Arc<dyn Store<SessionState>>,
    max_data_bytes: usize,
}

impl PairwiseRelay {
    pub fn new(session: Arc<dyn Store<SessionState>>, max_data_bytes: usize) -> Self {
        Self {
            session,
            max_data_bytes,
        }
    }

    /// Store an offer, answer or candidate, or reset the session
    pub fn submit(
        &self,
        kind: Option<&str>,
        data: Option<&str>,
    ) -> Result<SubmitReply, RelayError> {
        let kind: SignalKind = match kind.map(str::trim).filter(|k| !k.is_empty()) {
            Some(k) => k.parse()?,
            None => return Err(ProtocolError::MissingSignalKind.into()),
        };

        if kind == SignalKind::Reset {
            self.session
                .replace(SessionState::default())
                .map_err(RelayError::storage("Failed to reset session"))?;
            info!("Session reset");
            return Ok(SubmitReply {
                success: true,
                message: Some("Reset successful"),
            });
        }

        if data.map_or(true, |d| d.trim().is_empty()) {
            return Err(ValidationError::Missing { field: "data" }.into());
        }
        let value = validate_json_payload("data", data, self.max_data_bytes)?;
        if value.is_null() {
            return Err(ValidationError::Missing { field: "data" }.into());
        }

        let (phase, candidates) = transact(self.session.as_ref(), |state: &mut SessionState| {
            match kind {
                SignalKind::Offer => state.set_offer(value),
                SignalKind::Answer => {
                    if state.offer.is_none() {
                        warn!("Answer stored with no offer present");
                    }
                    state.set_answer(value);
                }
                SignalKind::Candidate => state.push_candidate(value),
                SignalKind::Reset => state.reset(),
            }
            (state.phase(), state.candidates.len())
        })
        .map_err(RelayError::storage("Failed to store signal"))?;

        match kind {
            SignalKind::Candidate => info!("Stored candidate: {} total", candidates),
            _ => info!("Stored {} ({:?})", kind.as_str(), phase),
        }

        Ok(SubmitReply {
            success: true,
            message: None,
        })
    }

    /// Current offer, answer and candidate(s)
    pub fn poll(&self, since: Option<usize>) -> Result<PollReply, RelayError> {
        let state = self
            .session
            .read()
            .map_err(RelayError::storage("Failed to read session"))?;

        let (candidates, next) = match since {
            Some(since) => (
                Some(state.candidates_since(since).to_vec()),
                Some(state.candidates.len()),
            ),
            None => (None, None),
        };

        Ok(PollReply {
            candidate: state.latest_candidate().cloned(),
            offer: state.offer,
            answer: state.answer,
            candidates,
            next,
        })
    }
}
