//! Request-level errors

use axum::http::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

use handshake_core::{Action, ProtocolError, SignalKind, ValidationError};

use crate::storage::StorageError;

/// Everything a single relay request can fail with. None of these are fatal
/// to the process.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Bad input; the store was not touched
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Unknown operation
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Store unavailable; the caller may retry
    #[error("{context}")]
    Storage {
        context: &'static str,
        #[source]
        source: StorageError,
    },

    /// The blocking worker running the request died
    #[error("Request worker failed")]
    Worker,
}

impl RelayError {
    /// Adapter for `map_err` that tags a storage failure with what was attempted
    pub fn storage(context: &'static str) -> impl FnOnce(StorageError) -> RelayError {
        move |source| RelayError::Storage { context, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) | RelayError::Protocol(_) => StatusCode::BAD_REQUEST,
            RelayError::Storage { .. } | RelayError::Worker => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Extra detail attached to error responses
    pub fn details(&self) -> Value {
        match self {
            RelayError::Protocol(ProtocolError::UnknownAction(_)) => {
                json!({ "valid_actions": Action::catalog() })
            }
            RelayError::Protocol(
                ProtocolError::UnknownSignalKind(_) | ProtocolError::MissingSignalKind,
            ) => {
                let kinds: Vec<&str> = SignalKind::ALL.iter().map(|k| k.as_str()).collect();
                json!({ "valid_types": kinds })
            }
            _ => json!({}),
        }
    }
}
