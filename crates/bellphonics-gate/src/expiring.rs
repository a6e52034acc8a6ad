//! TTL-keyed presence store with lazy garbage collection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tracks when each key was last marked, forgetting keys older than `ttl`.
///
/// An entry whose age exceeds the TTL is treated as absent even before
/// [`gc`](Self::gc) physically removes it. Every query collects garbage
/// first, so memory is bounded by the number of distinct keys marked within
/// the last `ttl`.
#[derive(Debug, Clone)]
pub struct ExpiringKeySet {
    ttl: Duration,
    entries: HashMap<String, Instant>,
}

impl ExpiringKeySet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns whether `key` is present and unexpired. Does not mark it.
    pub fn seen(&mut self, key: &str, now: Instant) -> bool {
        self.last_seen(key, now).is_some()
    }

    /// Returns when `key` was last marked, if that mark is still live.
    pub fn last_seen(&mut self, key: &str, now: Instant) -> Option<Instant> {
        self.gc(now);
        self.entries
            .get(key)
            .copied()
            .filter(|marked| !self.is_expired(*marked, now))
    }

    /// Records or refreshes `key` at `now`.
    pub fn mark(&mut self, key: &str, now: Instant) {
        self.entries.insert(key.to_string(), now);
    }

    /// Removes every entry older than the TTL.
    pub fn gc(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, marked| now.saturating_duration_since(*marked) <= ttl);
    }

    /// Number of physically stored entries, including not-yet-collected ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, marked: Instant, now: Instant) -> bool {
        now.saturating_duration_since(marked) > self.ttl
    }
}
