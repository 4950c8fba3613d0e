//! Message id generation
//!
//! Ids look like `msg_<16 hex stamp><8 hex random>`. The stamp is the
//! microsecond wall clock, forced strictly increasing within the process,
//! so ids sort lexicographically in generation order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

/// Prefix shared by all message ids
pub const MESSAGE_ID_PREFIX: &str = "msg_";

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

fn next_stamp() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);

    let mut last = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_STAMP.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Generate a new message id
pub fn generate_message_id() -> String {
    let mut bytes = [0u8; 4];
    if let Err(e) = getrandom::fill(&mut bytes) {
        // The stamp alone is still unique within this process
        warn!("RNG unavailable for message id suffix: {}", e);
    }
    format!("{}{:016x}{}", MESSAGE_ID_PREFIX, next_stamp(), hex::encode(bytes))
}
