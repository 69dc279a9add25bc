//! Per-backend circuit breaker to isolate failing backends
//!
//! Each delivery backend gets its own breaker, so one misbehaving backend
//! cannot starve traffic that the others could still serve.
//!
//! # Circuit Breaker Pattern
//!
//! The circuit breaker has three states:
//! - **Closed**: Normal operation, every trial is let through
//! - **Open**: Backend judged failing, trials are rejected without calling it
//! - **Half-Open**: Recovery timeout elapsed, a single probe trial is let through
//!
//! # State Transitions
//!
//! ```text
//! ┌─────────┐  failure_threshold consecutive failures  ┌──────┐
//! │ Closed  │ ───────────────────────────────────────> │ Open │
//! └─────────┘                                          └──────┘
//!     ^                                                   │
//!     │                                                   │ queried at or after next_retry_at
//!     │                                                   v
//!     │  Probe succeeds            ┌───────────────┐
//!     └────────────────────────────│  Half-Open    │
//!                                  └───────────────┘
//!                                          │
//!                                          │ Probe fails
//!                                          v
//!                                      ┌──────┐
//!                                      │ Open │
//!                                      └──────┘
//! ```
//!
//! The move from Open to Half-Open is not driven by a timer. It happens as a
//! side effect of the first query ([`CircuitBreaker::is_open`] or
//! [`CircuitBreaker::execute`]) made once `next_retry_at` has passed.
//!
//! Admission and that transition happen under the same lock, and a probe is
//! marked in flight as soon as it is admitted. Concurrent callers keep seeing
//! the breaker as open until the probe resolves, so exactly one trial is ever
//! made against a recovering backend.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{BackendError, DispatchError};

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before a probe is allowed (milliseconds)
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,

    /// Upper bound for a single backend call (milliseconds).
    ///
    /// A call exceeding it counts as a failure. `None` disables the bound.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: Option<u64>,

    /// Per-backend overrides, keyed by backend name
    #[serde(default)]
    pub backend_overrides: ahash::AHashMap<String, CircuitOverride>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            backend_overrides: ahash::AHashMap::default(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Settings for `backend`, taking each field from its override when set
    /// and from the global values otherwise
    #[must_use]
    pub fn for_backend(&self, backend: &str) -> BackendCircuitConfig {
        let overrides = self.backend_overrides.get(backend);

        BackendCircuitConfig {
            failure_threshold: overrides
                .and_then(|o| o.failure_threshold)
                .unwrap_or(self.failure_threshold),
            recovery_timeout_ms: overrides
                .and_then(|o| o.recovery_timeout_ms)
                .unwrap_or(self.recovery_timeout_ms),
            call_timeout_ms: overrides
                .and_then(|o| o.call_timeout_ms)
                .or(self.call_timeout_ms),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_timeout_ms() -> u64 {
    30_000
}

#[allow(clippy::unnecessary_wraps, reason = "serde default for an optional field")]
const fn default_call_timeout_ms() -> Option<u64> {
    Some(5_000)
}

/// Override of the global breaker settings for one backend.
///
/// Omitted fields inherit the global value, including the call timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitOverride {
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    #[serde(default)]
    pub recovery_timeout_ms: Option<u64>,
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

/// Resolved circuit breaker settings of a single backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCircuitConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub call_timeout_ms: Option<u64>,
}

impl BackendCircuitConfig {
    const fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Rejecting trials until the recovery timeout elapses
    Open,
    /// Waiting on, or ready for, a single probe trial
    HalfOpen,
}

/// Kind of trial admitted by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trial {
    /// Regular trial through a closed circuit
    Normal,
    /// The single trial allowed while half-open
    Probe,
}

/// Mutable state of one breaker
#[derive(Debug)]
struct CircuitRecord {
    state: CircuitState,
    consecutive_failures: u32,
    /// When an open circuit may be probed again
    next_retry_at: Option<Instant>,
    /// Whether the half-open probe has been handed out and not yet resolved
    probe_in_flight: bool,
}

impl CircuitRecord {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            next_retry_at: None,
            probe_in_flight: false,
        }
    }

    /// Move an expired Open circuit to Half-Open
    fn refresh(&mut self, backend: &str, now: Instant) {
        if self.state == CircuitState::Open && self.next_retry_at.is_none_or(|at| now >= at) {
            self.state = CircuitState::HalfOpen;
            self.probe_in_flight = false;
            tracing::info!(
                backend,
                "Circuit breaker entering HALF-OPEN state - testing recovery"
            );
        }
    }

    fn is_open(&mut self, backend: &str, now: Instant) -> bool {
        self.refresh(backend, now);
        match self.state {
            CircuitState::Closed => false,
            CircuitState::Open => true,
            CircuitState::HalfOpen => self.probe_in_flight,
        }
    }

    /// Hand out a trial, or `None` if the circuit rejects it
    fn admit(&mut self, backend: &str, now: Instant) -> Option<Trial> {
        self.refresh(backend, now);
        match self.state {
            CircuitState::Closed => Some(Trial::Normal),
            CircuitState::Open => None,
            CircuitState::HalfOpen if self.probe_in_flight => None,
            CircuitState::HalfOpen => {
                self.probe_in_flight = true;
                Some(Trial::Probe)
            }
        }
    }

    /// Returns `true` if the circuit transitioned to Closed
    fn record_success(&mut self, backend: &str, trial: Trial) -> bool {
        self.consecutive_failures = 0;

        if trial == Trial::Probe && self.state == CircuitState::HalfOpen {
            self.state = CircuitState::Closed;
            self.next_retry_at = None;
            self.probe_in_flight = false;
            tracing::info!(backend, "Circuit breaker CLOSED - normal operation resumed");
            return true;
        }

        if self.state == CircuitState::Open {
            // A trial admitted before the circuit opened finished late
            tracing::debug!(backend, "Late success while circuit is open");
        }
        false
    }

    /// Returns `true` if the circuit transitioned to Open
    fn record_failure(
        &mut self,
        backend: &str,
        trial: Trial,
        config: &BackendCircuitConfig,
        now: Instant,
    ) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        match (self.state, trial) {
            (CircuitState::HalfOpen, Trial::Probe) => {
                self.open(now, config);
                tracing::warn!(backend, "Circuit breaker probe failed - reopening circuit");
                true
            }
            (CircuitState::Closed, _) if self.consecutive_failures >= config.failure_threshold => {
                self.open(now, config);
                tracing::warn!(
                    backend,
                    failure_count = self.consecutive_failures,
                    threshold = config.failure_threshold,
                    recovery_timeout_ms = config.recovery_timeout_ms,
                    "Circuit breaker OPENED - rejecting trials"
                );
                true
            }
            _ => false,
        }
    }

    fn open(&mut self, now: Instant, config: &BackendCircuitConfig) {
        self.state = CircuitState::Open;
        self.next_retry_at = Some(now + config.recovery_timeout());
        self.probe_in_flight = false;
    }
}

/// Circuit breaker guarding a single backend
#[derive(Debug)]
pub struct CircuitBreaker {
    backend: String,
    config: BackendCircuitConfig,
    record: parking_lot::Mutex<CircuitRecord>,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker for `backend`
    #[must_use]
    pub fn new(backend: impl Into<String>, config: BackendCircuitConfig) -> Self {
        Self {
            backend: backend.into(),
            config,
            record: parking_lot::Mutex::new(CircuitRecord::new()),
        }
    }

    /// Name of the guarded backend
    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Check whether the breaker currently rejects trials.
    ///
    /// Once the recovery timeout has elapsed this moves an open circuit to
    /// half-open and reports it as not open, so the caller's next trial
    /// becomes the probe.
    pub fn is_open(&self) -> bool {
        self.record.lock().is_open(&self.backend, Instant::now())
    }

    /// Run `operation` through the breaker.
    ///
    /// Returns [`DispatchError::CircuitOpen`] without calling `operation` when
    /// the circuit rejects the trial. Otherwise the outcome feeds the state
    /// machine and a failure comes back as [`DispatchError::Backend`] carrying
    /// the operation's own error. A call exceeding the configured call timeout
    /// fails with [`BackendError::Timeout`].
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let trial = self
            .record
            .lock()
            .admit(&self.backend, Instant::now())
            .ok_or_else(|| DispatchError::CircuitOpen {
                backend: self.backend.clone(),
            })?;

        let mut guard = TrialGuard {
            breaker: self,
            trial,
            settled: false,
        };

        let outcome = match self.config.call_timeout() {
            Some(limit) => tokio::time::timeout(limit, operation())
                .await
                .unwrap_or(Err(BackendError::Timeout(limit))),
            None => operation().await,
        };

        guard.settle(outcome.is_ok());

        outcome.map_err(|source| DispatchError::Backend {
            backend: self.backend.clone(),
            source,
        })
    }

    fn settle(&self, trial: Trial, success: bool) {
        let mut record = self.record.lock();
        if success {
            record.record_success(&self.backend, trial);
        } else {
            record.record_failure(&self.backend, trial, &self.config, Instant::now());
        }
    }

    /// Force the circuit closed with no failures and no scheduled retry
    pub fn reset(&self) {
        *self.record.lock() = CircuitRecord::new();
        tracing::info!(backend = %self.backend, "Circuit breaker reset");
    }

    /// Current state without triggering the Open to Half-Open transition
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.record.lock().state
    }

    /// Get statistics for monitoring and debugging
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let now = Instant::now();
        let record = self.record.lock();
        CircuitBreakerStats {
            state: record.state,
            consecutive_failures: record.consecutive_failures,
            next_retry_in_ms: record.next_retry_at.map(|at| {
                u64::try_from(at.saturating_duration_since(now).as_millis()).unwrap_or(u64::MAX)
            }),
            probe_in_flight: record.probe_in_flight,
        }
    }
}

/// Resolves an admitted trial, including when its future is dropped early.
///
/// An abandoned probe counts as a failed probe so the circuit cannot stay
/// half-open with nobody probing it.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    trial: Trial,
    settled: bool,
}

impl TrialGuard<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.settle(self.trial, success);
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial == Trial::Probe {
            self.breaker.settle(self.trial, false);
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Current circuit state
    pub state: CircuitState,
    /// Number of consecutive failed trials
    pub consecutive_failures: u32,
    /// Time left until an open circuit may be probed
    pub next_retry_in_ms: Option<u64>,
    /// Whether a half-open probe is currently running
    pub probe_in_flight: bool,
}
