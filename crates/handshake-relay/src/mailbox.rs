//! Addressed relay: per-recipient mailboxes plus a presence table
//!
//! Every operation is one or two store transactions. Eviction runs inside
//! the same transaction as the mutation it precedes, and its result is
//! persisted, so cleanup is always lazy and never needs a background task.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use handshake_core::eviction::EvictionPolicy;
use handshake_core::id::generate_message_id;
use handshake_core::validate::{sanitize_field, validate_json_payload};
use handshake_core::{
    Action, Clock, DeliveredMessage, MessageLog, PresenceTable, PublicUser, RelayConfig,
    StoredMessage,
};

use crate::error::RelayError;
use crate::storage::{transact, Store};

/// Decoded request fields
pub type Params = HashMap<String, String>;

/// Result of `send`
#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub message_count: usize,
}

/// Result of `receive`
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub messages: Vec<DeliveredMessage>,
    pub count: usize,
}

/// Result of `register`
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub registered: bool,
}

/// Result of `users`
#[derive(Debug, Clone, Serialize)]
pub struct UserList {
    pub users: Vec<PublicUser>,
    pub count: usize,
}

/// Result of `status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub server: &'static str,
    pub messages_store: String,
    pub users_store: String,
    pub message_count: usize,
    pub active_users: usize,
    pub message_ttl: u64,
    pub user_ttl: u64,
    pub max_messages: usize,
    pub storage_writable: bool,
    pub version: &'static str,
    pub server_time: String,
}

/// Result of `cleanup`
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub messages_removed: usize,
    pub users_removed: usize,
    pub messages_remaining: usize,
    pub users_remaining: usize,
}

/// Successful outcome of a dispatched action
#[derive(Debug, Clone)]
pub struct Reply {
    pub message: &'static str,
    pub data: Value,
}

impl Reply {
    fn new(message: &'static str, data: impl Serialize) -> Self {
        Self {
            message,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }
}

/// Multi-user signaling relay
pub struct AddressedRelay {
    messages: Arc<dyn Store<MessageLog>>,
    presence: Arc<dyn Store<PresenceTable>>,
    clock: Arc<dyn Clock>,
    config: RelayConfig,
}

impl AddressedRelay {
    pub fn new(
        messages: Arc<dyn Store<MessageLog>>,
        presence: Arc<dyn Store<PresenceTable>>,
        clock: Arc<dyn Clock>,
        config: RelayConfig,
    ) -> Self {
        Self {
            messages,
            presence,
            clock,
            config,
        }
    }

    fn message_policy(&self) -> EvictionPolicy {
        EvictionPolicy::messages(&self.config)
    }

    fn presence_policy(&self) -> EvictionPolicy {
        EvictionPolicy::presence(&self.config)
    }

    /// Route one decoded request to its operation
    pub fn dispatch(
        &self,
        action: Action,
        params: &Params,
        origin: &str,
    ) -> Result<Reply, RelayError> {
        let field = |name: &str| params.get(name).map(String::as_str);

        match action {
            Action::Send => {
                let receipt = self.send(
                    field("from"),
                    field("to"),
                    field("type"),
                    field("data"),
                    origin,
                )?;
                Ok(Reply::new("Message sent successfully", receipt))
            }
            Action::Receive => {
                let delivery = self.receive(field("to"), origin)?;
                Ok(Reply::new("Messages retrieved successfully", delivery))
            }
            Action::Users => Ok(Reply::new("Active users retrieved", self.users()?)),
            Action::Register => {
                let registration = self.register(field("userId"), origin)?;
                Ok(Reply::new("User registered successfully", registration))
            }
            Action::Status => Ok(Reply::new("Server status OK", self.status()?)),
            Action::Cleanup => Ok(Reply::new("Cleanup completed", self.cleanup()?)),
            Action::Clear => {
                self.clear()?;
                Ok(Reply::new(
                    "All data cleared",
                    json!({ "messages_cleared": true, "users_cleared": true }),
                ))
            }
        }
    }

    /// Queue a message for `to`
    pub fn send(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        kind: Option<&str>,
        data: Option<&str>,
        origin: &str,
    ) -> Result<SendReceipt, RelayError> {
        let from = sanitize_field("from", from, self.config.max_id_len)?;
        let to = sanitize_field("to", to, self.config.max_id_len)?;
        let kind = sanitize_field("type", kind, self.config.max_type_len)?;
        validate_json_payload("data", data, self.config.max_data_bytes)?;
        let data = data.unwrap_or_default().to_string();

        let now = self.clock.now_secs();
        let policy = self.message_policy();
        let message = StoredMessage {
            id: generate_message_id(),
            from: from.clone(),
            to,
            kind,
            data,
            created_at: now,
            origin: origin.to_string(),
        };
        let message_id = message.id.clone();

        let (evicted, message_count) = transact(self.messages.as_ref(), |log: &mut MessageLog| {
            let evicted = log.evict(&policy, now);
            log.messages.push(message);
            // Appending may push the log over the cap
            let evicted = evicted + log.evict(&policy, now);
            (evicted, log.len())
        })
        .map_err(RelayError::storage("Failed to save message"))?;

        if evicted > 0 {
            debug!("Evicted {} messages while sending", evicted);
        }
        debug!("Message {} queued from {} ({} stored)", message_id, from, message_count);

        self.refresh_presence(&from, origin, now);

        Ok(SendReceipt {
            message_id,
            message_count,
        })
    }

    /// Drain every message addressed to `to`
    pub fn receive(&self, to: Option<&str>, origin: &str) -> Result<Delivery, RelayError> {
        let to = sanitize_field("to", to, self.config.max_id_len)?;

        let now = self.clock.now_secs();
        let policy = self.message_policy();

        let matched = transact(self.messages.as_ref(), |log: &mut MessageLog| {
            log.evict(&policy, now);
            log.take_for(&to)
        })
        .map_err(RelayError::storage("Failed to read messages"))?;

        if !matched.is_empty() {
            debug!("Delivering {} messages to {}", matched.len(), to);
        }

        self.refresh_presence(&to, origin, now);

        let messages: Vec<DeliveredMessage> =
            matched.into_iter().map(StoredMessage::into_delivered).collect();
        Ok(Delivery {
            count: messages.len(),
            messages,
        })
    }

    /// Mark `user_id` as active
    pub fn register(
        &self,
        user_id: Option<&str>,
        origin: &str,
    ) -> Result<Registration, RelayError> {
        let user_id = sanitize_field("userId", user_id, self.config.max_id_len)?;
        let now = self.clock.now_secs();

        self.touch(&user_id, origin, now)
            .map_err(RelayError::storage("Failed to register user"))?;

        info!("User registered: {}", user_id);
        Ok(Registration {
            user_id,
            registered: true,
        })
    }

    /// Active users, after evicting inactive ones
    pub fn users(&self) -> Result<UserList, RelayError> {
        let now = self.clock.now_secs();
        let policy = self.presence_policy();

        let users = transact(self.presence.as_ref(), |table: &mut PresenceTable| {
            table.evict(&policy, now);
            table.public_users()
        })
        .map_err(RelayError::storage("Failed to read users"))?;

        Ok(UserList {
            count: users.len(),
            users,
        })
    }

    /// Counts and limits, after evicting both tables
    pub fn status(&self) -> Result<StatusReport, RelayError> {
        let report = self.evict_all()?;
        let now = self.clock.now_secs();

        let server_time = chrono::DateTime::from_timestamp(now as i64, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();

        Ok(StatusReport {
            server: "running",
            messages_store: self.messages.describe(),
            users_store: self.presence.describe(),
            message_count: report.messages_remaining,
            active_users: report.users_remaining,
            message_ttl: self.config.message_ttl_secs,
            user_ttl: self.config.presence_ttl_secs,
            max_messages: self.config.max_messages,
            storage_writable: self.messages.is_writable() && self.presence.is_writable(),
            version: env!("CARGO_PKG_VERSION"),
            server_time,
        })
    }

    /// Evict expired data from both tables
    pub fn cleanup(&self) -> Result<CleanupReport, RelayError> {
        let report = self.evict_all()?;
        if report.messages_removed > 0 || report.users_removed > 0 {
            info!(
                "Cleanup removed {} messages and {} users",
                report.messages_removed, report.users_removed
            );
        }
        Ok(report)
    }

    /// Drop every message and presence record
    pub fn clear(&self) -> Result<(), RelayError> {
        self.messages
            .replace(MessageLog::default())
            .map_err(RelayError::storage("Failed to clear messages"))?;
        self.presence
            .replace(PresenceTable::default())
            .map_err(RelayError::storage("Failed to clear users"))?;

        warn!("All relay data cleared");
        Ok(())
    }

    fn evict_all(&self) -> Result<CleanupReport, RelayError> {
        let now = self.clock.now_secs();
        let message_policy = self.message_policy();
        let presence_policy = self.presence_policy();

        let (messages_removed, messages_remaining) =
            transact(self.messages.as_ref(), |log: &mut MessageLog| {
                (log.evict(&message_policy, now), log.len())
            })
            .map_err(RelayError::storage("Failed to clean up messages"))?;

        let (users_removed, users_remaining) =
            transact(self.presence.as_ref(), |table: &mut PresenceTable| {
                (table.evict(&presence_policy, now), table.len())
            })
            .map_err(RelayError::storage("Failed to clean up users"))?;

        Ok(CleanupReport {
            messages_removed,
            users_removed,
            messages_remaining,
            users_remaining,
        })
    }

    fn touch(&self, user_id: &str, origin: &str, now: u64) -> Result<(), crate::StorageError> {
        let policy = self.presence_policy();
        self.presence.update(&mut |table| {
            table.evict(&policy, now);
            table.touch(user_id, origin, now);
        })
    }

    /// Presence refresh that rides along with send/receive. The primary
    /// operation already succeeded, so a failure here is only logged.
    fn refresh_presence(&self, user_id: &str, origin: &str, now: u64) {
        if let Err(e) = self.touch(user_id, origin, now) {
            warn!("Failed to refresh presence for {}: {}", user_id, e);
        }
    }
}
