//! Relay operations and the response envelope

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Operations of the addressed (multi-user) relay
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Queue a message for a recipient
    Send,
    /// Drain the caller's mailbox
    Receive,
    /// List active users
    Users,
    /// Refresh the caller's presence
    Register,
    /// Report counts and limits
    Status,
    /// Evict expired data
    Cleanup,
    /// Drop everything
    Clear,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::Send,
        Action::Receive,
        Action::Users,
        Action::Register,
        Action::Status,
        Action::Cleanup,
        Action::Clear,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Send => "send",
            Action::Receive => "receive",
            Action::Users => "users",
            Action::Register => "register",
            Action::Status => "status",
            Action::Cleanup => "cleanup",
            Action::Clear => "clear",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Action::Send => "Send a message to a peer",
            Action::Receive => "Receive messages for a user",
            Action::Users => "Get list of active users",
            Action::Register => "Register/update user activity",
            Action::Status => "Get server status",
            Action::Cleanup => "Clean up expired data",
            Action::Clear => "Clear all data (dev only)",
        }
    }

    /// `{name: description}` map returned alongside unknown-action errors
    pub fn catalog() -> Value {
        Value::Object(
            Self::ALL
                .iter()
                .map(|a| (a.as_str().to_string(), Value::from(a.description())))
                .collect(),
        )
    }
}

impl FromStr for Action {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownAction(s.to_string()))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal types of the pairwise relay
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    Reset,
}

impl SignalKind {
    pub const ALL: [SignalKind; 4] = [
        SignalKind::Offer,
        SignalKind::Answer,
        SignalKind::Candidate,
        SignalKind::Reset,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
            SignalKind::Reset => "reset",
        }
    }
}

impl FromStr for SignalKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownSignalKind(s.to_string()))
    }
}

/// Uniform response envelope of the addressed relay
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    pub data: Value,
    /// Unix seconds
    pub timestamp: u64,
}

impl Envelope {
    pub fn ok(message: impl Into<String>, data: Value, timestamp: u64) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            timestamp,
        }
    }

    pub fn error(message: impl Into<String>, data: Value, timestamp: u64) -> Self {
        Self {
            success: false,
            message: message.into(),
            data,
            timestamp,
        }
    }
}
