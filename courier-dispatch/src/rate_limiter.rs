//! Global admission control using a sliding window
//!
//! Every submission that reaches the rate limiter is checked against a single
//! window shared by all requests and all backends.
//!
//! # Sliding Window
//!
//! - The timestamp of every admitted request is remembered
//! - Before each decision, timestamps older than the window are pruned
//! - A request is admitted while fewer than `max_requests` timestamps remain
//! - A rejected request leaves the window untouched
//!
//! # Example
//!
//! ```text
//! Limit: 2 requests per 1000ms
//!
//! t=0ms:    admit  (window: [0])
//! t=10ms:   admit  (window: [0, 10])
//! t=20ms:   reject (window full, next slot frees at t=1000ms)
//! t=1000ms: admit  (0 pruned, window: [10, 1000])
//! ```

use std::{collections::VecDeque, time::Duration};

use chrono::{DateTime, Utc};
use courier_common::internal;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Configuration for the global rate limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Length of the trailing window (milliseconds)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

const fn default_max_requests() -> u32 {
    10
}

const fn default_window_ms() -> u64 {
    60_000 // One minute
}

/// Timestamps of admitted requests, oldest first
#[derive(Debug, Default)]
struct RateWindow {
    admitted: VecDeque<Instant>,
}

impl RateWindow {
    /// Drop every entry that is `window` or more in the past
    fn prune(&mut self, now: Instant, window: Duration) {
        while self
            .admitted
            .front()
            .is_some_and(|&entry| now.saturating_duration_since(entry) >= window)
        {
            self.admitted.pop_front();
        }
    }

    fn len(&self) -> usize {
        self.admitted.len()
    }
}

/// Sliding window rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    entries: Mutex<RateWindow>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: Duration::from_millis(config.window_ms),
            entries: Mutex::new(RateWindow::default()),
        }
    }

    /// Try to take a slot in the current window.
    ///
    /// Returns `true` and records the request if a slot is free, `false`
    /// (without recording anything) otherwise.
    pub fn admit(&self) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.prune(now, self.window);

        if entries.len() < self.max_requests as usize {
            entries.admitted.push_back(now);
            true
        } else {
            let in_window = entries.len();
            drop(entries);
            internal!(
                level = DEBUG,
                in_window,
                max_requests = self.max_requests,
                "Rate limit window is full"
            );
            false
        }
    }

    /// Current window usage.
    ///
    /// Prunes like [`admit`](Self::admit) but never records a request.
    pub fn status(&self) -> RateLimitStatus {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.prune(now, self.window);

        let used = u32::try_from(entries.len()).unwrap_or(u32::MAX);
        let reset_after = entries.admitted.front().map_or(Duration::ZERO, |&oldest| {
            (oldest + self.window).saturating_duration_since(now)
        });
        drop(entries);

        RateLimitStatus {
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(used),
            reset_after_ms: u64::try_from(reset_after.as_millis()).unwrap_or(u64::MAX),
            reset_at: Utc::now()
                + chrono::Duration::from_std(reset_after).unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }

    /// Forget every admitted request
    pub fn reset(&self) {
        self.entries.lock().admitted.clear();
        internal!(level = INFO, "Rate limiter reset");
    }
}

/// Snapshot of the rate limiter for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    /// Configured requests per window
    pub limit: u32,
    /// Slots still free in the current window
    pub remaining: u32,
    /// Time until the oldest admitted request leaves the window, `0` when the
    /// window is empty
    pub reset_after_ms: u64,
    /// Wall clock time at which the next slot frees
    pub reset_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            max_requests,
            window_ms,
        })
    }

    #[test]
    fn test_rate_limit_config_defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 10);
        assert_eq!(config.window_ms, 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_limit() {
        let limiter = limiter(3, 1000);

        for _ in 0..3 {
            assert!(limiter.admit());
        }
        assert!(!limiter.admit());
        assert!(!limiter.admit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_does_not_consume_slot() {
        let limiter = limiter(1, 1000);

        assert!(limiter.admit());
        assert!(!limiter.admit());
        assert_eq!(limiter.status().remaining, 0);

        // Only the admitted request occupies the window, so it frees on time
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(limiter.admit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = limiter(2, 1000);

        assert!(limiter.admit());
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(limiter.admit());
        assert!(!limiter.admit());

        // First entry leaves the window, the second is still inside
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(limiter.admit());
        assert!(!limiter.admit());

        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(limiter.admit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_remaining_and_reset() {
        let limiter = limiter(5, 1000);

        let status = limiter.status();
        assert_eq!(status.remaining, 5);
        assert_eq!(status.reset_after_ms, 0);

        limiter.admit();
        tokio::time::advance(Duration::from_millis(250)).await;
        limiter.admit();

        let status = limiter.status();
        assert_eq!(status.limit, 5);
        assert_eq!(status.remaining, 3);
        assert_eq!(status.reset_after_ms, 750);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_does_not_admit() {
        let limiter = limiter(1, 1000);

        for _ in 0..5 {
            assert_eq!(limiter.status().remaining, 1);
        }
        assert!(limiter.admit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_window() {
        let limiter = limiter(2, 60_000);

        assert!(limiter.admit());
        assert!(limiter.admit());
        assert!(!limiter.admit());

        limiter.reset();
        assert_eq!(limiter.status().remaining, 2);
        assert!(limiter.admit());
    }
}
