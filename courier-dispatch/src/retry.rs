//! Retry logic with exponential backoff

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How many sweeps over the backends a delivery gets, and how long to wait
/// between them.
///
/// # Formula
/// `delay = min(base * 2^(attempt - 1), max_delay) + uniform(0, jitter)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts per delivery
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay after the first failed attempt (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap of the exponential part of the delay (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter added to every delay (milliseconds)
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1_000
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_jitter_ms() -> u64 {
    1_000
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-indexed), without jitter
    #[must_use]
    pub const fn exponential_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = if exponent >= 63 {
            // 2^63 would overflow
            self.max_delay_ms
        } else {
            let multiplier = 1u64 << exponent;
            let raw = self.base_delay_ms.saturating_mul(multiplier);
            if raw < self.max_delay_ms {
                raw
            } else {
                self.max_delay_ms
            }
        };
        Duration::from_millis(delay)
    }

    /// Delay before the attempt following `attempt` (1-indexed), with jitter
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.jitter_ms)
        };
        self.exponential_delay(attempt) + Duration::from_millis(jitter)
    }

    /// Whether another attempt follows `attempt`
    #[must_use]
    pub const fn has_next(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}
