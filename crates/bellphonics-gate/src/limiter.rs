//! Per-minute fixed-window request counter.

use std::time::{Duration, Instant};

/// Length of one rate window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Counts acquisitions in successive, non-overlapping 60-second windows.
///
/// This is a plain fixed window: a caller can land `limit` requests at the
/// end of one window and `limit` more at the start of the next.
#[derive(Debug, Clone)]
pub struct FixedWindowLimiter {
    limit: u32,
    window_start: Instant,
    count: u32,
}

impl FixedWindowLimiter {
    /// Creates a limiter whose first window opens at `now`.
    ///
    /// A `limit` of zero disables limiting.
    pub fn new(limit: u32, now: Instant) -> Self {
        Self {
            limit,
            window_start: now,
            count: 0,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    /// Counts one request and reports whether it fits in the current window.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }

        if now.saturating_duration_since(self.window_start) >= RATE_WINDOW {
            self.window_start = now;
            self.count = 0;
        }

        self.count = self.count.saturating_add(1);
        self.count <= self.limit
    }
}
