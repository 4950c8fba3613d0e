//! Relay data model
//!
//! These are the documents the durable store persists. Their serde layout is
//! the on-disk layout, so field names are part of the storage format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::eviction::{EvictionPolicy, Timestamped};

/// A message waiting in a recipient's mailbox
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Unique, generation-ordered id
    pub id: String,
    /// Sanitized sender id
    pub from: String,
    /// Sanitized recipient id
    pub to: String,
    /// Sanitized type tag (e.g. "offer", "answer", "candidate")
    #[serde(rename = "type")]
    pub kind: String,
    /// JSON-encoded payload, kept verbatim
    pub data: String,
    /// Unix seconds at which the relay accepted the message
    #[serde(default, alias = "timestamp")]
    pub created_at: u64,
    /// Sender network address; never delivered
    #[serde(default, alias = "ip")]
    pub origin: String,
}

impl StoredMessage {
    /// Strip relay-private fields for delivery
    pub fn into_delivered(self) -> DeliveredMessage {
        DeliveredMessage {
            id: self.id,
            from: self.from,
            to: self.to,
            kind: self.kind,
            data: self.data,
        }
    }
}

impl Timestamped for StoredMessage {
    fn timestamp(&self) -> u64 {
        self.created_at
    }
}

/// A message as handed to its recipient
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
}

/// One presence entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub id: String,
    #[serde(default)]
    pub last_seen: u64,
    /// Network address of the last request; never exposed
    #[serde(default, alias = "ip")]
    pub origin: String,
}

impl Timestamped for PresenceRecord {
    fn timestamp(&self) -> u64 {
        self.last_seen
    }
}

/// Presence entry as listed to callers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: String,
    pub last_seen: u64,
}

/// All undelivered messages, in arrival order
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog {
    pub messages: Vec<StoredMessage>,
}

impl MessageLog {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Apply the eviction policy in place, returning how many were dropped
    pub fn evict(&mut self, policy: &EvictionPolicy, now: u64) -> usize {
        let before = self.messages.len();
        let messages = std::mem::take(&mut self.messages);
        self.messages = policy.evict(messages, now);
        before - self.messages.len()
    }

    /// Remove and return every message addressed to `to`, preserving order
    pub fn take_for(&mut self, to: &str) -> Vec<StoredMessage> {
        let (matched, remaining): (Vec<_>, Vec<_>) = std::mem::take(&mut self.messages)
            .into_iter()
            .partition(|m| m.to == to);
        self.messages = remaining;
        matched
    }
}

/// Active users keyed by id; at most one record per id
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresenceTable {
    pub users: BTreeMap<String, PresenceRecord>,
}

impl PresenceTable {
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&PresenceRecord> {
        self.users.get(id)
    }

    /// Apply the eviction policy in place, returning how many were dropped
    pub fn evict(&mut self, policy: &EvictionPolicy, now: u64) -> usize {
        let before = self.users.len();
        self.users.retain(|_, record| !policy.is_expired(record.last_seen, now));
        before - self.users.len()
    }

    /// Insert or refresh the record for `id`
    pub fn touch(&mut self, id: &str, origin: &str, now: u64) {
        self.users.insert(
            id.to_string(),
            PresenceRecord {
                id: id.to_string(),
                last_seen: now,
                origin: origin.to_string(),
            },
        );
    }

    /// Listing without network addresses
    pub fn public_users(&self) -> Vec<PublicUser> {
        self.users
            .values()
            .map(|r| PublicUser {
                id: r.id.clone(),
                last_seen: r.last_seen,
            })
            .collect()
    }
}

/// Negotiation progress of the pairwise session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Empty,
    Offered,
    Answered,
}

/// The single shared record of the pairwise variant
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub offer: Option<Value>,
    pub answer: Option<Value>,
    /// Append-only until reset
    pub candidates: Vec<Value>,
}

impl SessionState {
    /// Store a new offer; any previous answer belongs to the old round
    pub fn set_offer(&mut self, offer: Value) {
        self.offer = Some(offer);
        self.answer = None;
    }

    pub fn set_answer(&mut self, answer: Value) {
        self.answer = Some(answer);
    }

    pub fn push_candidate(&mut self, candidate: Value) {
        self.candidates.push(candidate);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Most recently appended candidate
    pub fn latest_candidate(&self) -> Option<&Value> {
        self.candidates.last()
    }

    /// Candidates from index `since` onward; an index past the end yields none
    pub fn candidates_since(&self, since: usize) -> &[Value] {
        self.candidates.get(since..).unwrap_or(&[])
    }

    pub fn phase(&self) -> SessionPhase {
        match (&self.offer, &self.answer) {
            (_, Some(_)) => SessionPhase::Answered,
            (Some(_), None) => SessionPhase::Offered,
            (None, None) => SessionPhase::Empty,
        }
    }
}
