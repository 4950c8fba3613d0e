//! Error types for the relay protocol

use thiserror::Error;

/// A request field failed validation; nothing was written
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Missing { field: &'static str },

    #[error("Field '{field}' exceeds maximum length of {max}")]
    TooLong { field: &'static str, max: usize },

    #[error("Invalid JSON format in {field} field")]
    InvalidJson { field: &'static str },

    #[error("Data payload too large (max {max} bytes)")]
    PayloadTooLarge { max: usize },

    #[error("Field '{field}' must be a non-negative integer")]
    NotAnIndex { field: &'static str },
}

/// The request named an operation the relay does not support
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid or missing action parameter")]
    UnknownAction(String),

    #[error("Unknown signal type '{0}'")]
    UnknownSignalKind(String),

    #[error("Missing type")]
    MissingSignalKind,
}
