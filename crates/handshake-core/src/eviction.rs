//! Expiry and eviction policy
//!
//! Two rules, applied in order:
//! 1. TTL: drop entries whose age (`now - timestamp`) is at least the TTL.
//!    A zero timestamp has age `now` and is therefore always stale.
//! 2. Size cap: if more than `max_entries` survive, keep only the most
//!    recently appended `max_entries`.
//!
//! Everything here is pure; callers persist the result.

use crate::config::RelayConfig;

/// Anything carrying a Unix-seconds timestamp
pub trait Timestamped {
    fn timestamp(&self) -> u64;
}

/// TTL plus optional size cap for one class of entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub ttl_secs: u64,
    pub max_entries: Option<usize>,
}

impl EvictionPolicy {
    /// Policy for the message log
    pub fn messages(config: &RelayConfig) -> Self {
        Self {
            ttl_secs: config.message_ttl_secs,
            max_entries: Some(config.max_messages),
        }
    }

    /// Policy for the presence table (no size cap)
    pub fn presence(config: &RelayConfig) -> Self {
        Self {
            ttl_secs: config.presence_ttl_secs,
            max_entries: None,
        }
    }

    /// Age of an entry; future timestamps count as fresh
    pub fn age(timestamp: u64, now: u64) -> u64 {
        now.saturating_sub(timestamp)
    }

    pub fn is_expired(&self, timestamp: u64, now: u64) -> bool {
        Self::age(timestamp, now) >= self.ttl_secs
    }

    /// Apply both rules to `entries` (arrival order) and return the survivors
    pub fn evict<T: Timestamped>(&self, entries: Vec<T>, now: u64) -> Vec<T> {
        let mut survivors: Vec<T> = entries
            .into_iter()
            .filter(|e| !self.is_expired(e.timestamp(), now))
            .collect();

        if let Some(max) = self.max_entries {
            if survivors.len() > max {
                let excess = survivors.len() - max;
                survivors.drain(..excess);
            }
        }

        survivors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Entry(u32, u64);

    impl Timestamped for Entry {
        fn timestamp(&self) -> u64 {
            self.1
        }
    }

    fn policy(ttl_secs: u64, max_entries: Option<usize>) -> EvictionPolicy {
        EvictionPolicy { ttl_secs, max_entries }
    }

    #[test]
    fn test_ttl_boundary() {
        let p = policy(60, None);
        assert!(!p.is_expired(1000, 1059));
        assert!(p.is_expired(1000, 1060));
        assert!(p.is_expired(1000, 1061));
    }

    #[test]
    fn test_zero_timestamp_is_stale() {
        let p = policy(300, None);
        assert!(p.is_expired(0, 1_700_000_000));

        let survivors = p.evict(vec![Entry(1, 0), Entry(2, 1_700_000_000)], 1_700_000_000);
        assert_eq!(survivors, vec![Entry(2, 1_700_000_000)]);
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let p = policy(60, None);
        assert_eq!(EvictionPolicy::age(2000, 1000), 0);
        assert!(!p.is_expired(2000, 1000));
    }

    #[test]
    fn test_size_cap_keeps_newest() {
        let p = policy(300, Some(3));
        let entries = (0..5).map(|i| Entry(i, 1000)).collect();

        let survivors = p.evict(entries, 1000);
        assert_eq!(survivors, vec![Entry(2, 1000), Entry(3, 1000), Entry(4, 1000)]);
    }

    #[test]
    fn test_ttl_applies_before_cap() {
        // Two stale entries at the front; the cap should then only see three survivors
        let p = policy(100, Some(3));
        let entries = vec![
            Entry(0, 1),
            Entry(1, 2),
            Entry(2, 950),
            Entry(3, 960),
            Entry(4, 970),
        ];

        let survivors = p.evict(entries, 1000);
        assert_eq!(survivors.iter().map(|e| e.0).collect::<Vec<_>>(), [2, 3, 4]);
    }

    #[test]
    fn test_policies_from_config() {
        let config = RelayConfig::default();
        assert_eq!(EvictionPolicy::messages(&config), policy(300, Some(1000)));
        assert_eq!(EvictionPolicy::presence(&config), policy(60, None));
    }

    #[test]
    fn test_empty_input() {
        let p = policy(10, Some(1));
        assert!(p.evict(Vec::<Entry>::new(), 5).is_empty());
    }
}
