//! Orchestration of submissions and their delivery loops
//!
//! [`Dispatcher::submit`] does the fast, synchronous part of a submission:
//!
//! 1. Validate the request and compute its fingerprint
//! 2. Return the existing status if the fingerprint was seen before
//! 3. Ask the global rate limiter for a slot, failing the submission if none
//! 4. Spawn the delivery loop and return the pending status
//!
//! The delivery loop then runs on its own task:
//!
//! ```text
//! for attempt in 1..=max_retries:
//!     for backend in configured order:
//!         skip if its circuit is open
//!         call it through its breaker, stop on success
//!     back off before the next attempt
//! mark failed with the last error
//! ```

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use courier_common::{internal, outgoing};
use serde::{Deserialize, Serialize};

use crate::{
    backend::DeliveryBackend,
    circuit_breaker::{CircuitBreaker, CircuitBreakerStats},
    config::DispatcherConfig,
    error::DispatchError,
    idempotency::IdempotencyIndex,
    rate_limiter::{RateLimitStatus, RateLimiter},
    retry::RetryPolicy,
    store::StatusStore,
    types::{DeliveryId, DeliveryRequest, DeliveryState, DeliveryStatus},
};

/// Interval at which [`Dispatcher::drain`] and [`Dispatcher::wait_for`] poll
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A backend together with the breaker guarding it
struct Route {
    backend: Arc<dyn DeliveryBackend>,
    breaker: CircuitBreaker,
}

impl Route {
    fn name(&self) -> &str {
        self.backend.name()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("backend", &self.name())
            .field("breaker", &self.breaker)
            .finish()
    }
}

#[derive(Debug)]
struct Shared {
    routes: Vec<Route>,
    rate_limiter: RateLimiter,
    store: StatusStore,
    idempotency: IdempotencyIndex,
    retry: RetryPolicy,
    in_flight: AtomicUsize,
}

/// Health of a single backend as seen by its breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Whether the backend currently takes trials
    pub healthy: bool,
    pub is_open: bool,
}

/// Routes delivery requests over an ordered list of backends.
///
/// Cloning is cheap; clones share all state.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Create a dispatcher over `backends`, tried in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Configuration`] when no backend is given, two
    /// backends share a name, or the retry policy allows no attempt at all.
    pub fn new(
        config: &DispatcherConfig,
        backends: Vec<Arc<dyn DeliveryBackend>>,
    ) -> Result<Self, DispatchError> {
        if backends.is_empty() {
            return Err(DispatchError::Configuration(
                "at least one backend is required".to_string(),
            ));
        }

        if config.retry.max_retries == 0 {
            return Err(DispatchError::Configuration(
                "max_retries must be at least 1".to_string(),
            ));
        }

        let mut seen = ahash::AHashSet::with_capacity(backends.len());
        for backend in &backends {
            if !seen.insert(backend.name()) {
                return Err(DispatchError::Configuration(format!(
                    "duplicate backend name: {}",
                    backend.name()
                )));
            }
        }

        for name in config.circuit_breaker.backend_overrides.keys() {
            if !seen.contains(name.as_str()) {
                tracing::warn!(
                    backend = %name,
                    "Circuit breaker override for unknown backend is ignored"
                );
            }
        }

        let routes = backends
            .into_iter()
            .map(|backend| Route {
                breaker: CircuitBreaker::new(
                    backend.name(),
                    config.circuit_breaker.for_backend(backend.name()),
                ),
                backend,
            })
            .collect::<Vec<_>>();

        let store = StatusStore::new();

        internal!(
            level = INFO,
            backends = ?routes.iter().map(Route::name).collect::<Vec<_>>(),
            max_requests = config.rate_limit.max_requests,
            window_ms = config.rate_limit.window_ms,
            max_retries = config.retry.max_retries,
            "Dispatcher ready"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                routes,
                rate_limiter: RateLimiter::new(&config.rate_limit),
                idempotency: IdempotencyIndex::new(store.clone()),
                store,
                retry: config.retry.clone(),
                in_flight: AtomicUsize::new(0),
            }),
        })
    }

    /// Accept a request for delivery.
    ///
    /// Returns at once with the status of the delivery; the delivery itself
    /// runs on a background task. Resubmitting an identical request returns
    /// the status of the first submission and starts nothing new.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::InvalidRequest`] if the request lacks content; nothing
    ///   is recorded
    /// - [`DispatchError::RateLimitExceeded`] if the global limit is reached;
    ///   the delivery is recorded as failed
    pub fn submit(&self, request: DeliveryRequest) -> Result<DeliveryStatus, DispatchError> {
        request.validate()?;
        let id = request.fingerprint();

        // The id is reserved before the rate check. An identical submission
        // racing with a denial can still see the reserved Pending status,
        // which then turns Failed without any delivery being attempted.
        if let Some(existing) = self.shared.idempotency.lookup_or_reserve(&id) {
            internal!(
                level = INFO,
                id = %id,
                state = %existing.state,
                "Duplicate submission ignored"
            );
            return Ok(existing);
        }

        if !self.shared.rate_limiter.admit() {
            let error = DispatchError::RateLimitExceeded;
            self.shared
                .store
                .update(&id, |status| status.mark_failed(error.to_string()));
            internal!(level = WARN, id = %id, "Rate limit exceeded, submission refused");
            return Err(error);
        }

        let status = self
            .shared
            .store
            .get(&id)
            .unwrap_or_else(|| DeliveryStatus::pending(id.clone()));

        internal!(
            level = DEBUG,
            id = %id,
            destination = %request.destination,
            "Submission accepted"
        );

        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(deliver(Arc::clone(&self.shared), id, request));

        Ok(status)
    }

    /// Latest status of the delivery with `id`
    #[must_use]
    pub fn status_of(&self, id: &DeliveryId) -> Option<DeliveryStatus> {
        self.shared.store.get(id)
    }

    /// Latest status of every delivery, optionally only those in `state`
    #[must_use]
    pub fn statuses(&self, state: Option<DeliveryState>) -> Vec<DeliveryStatus> {
        self.shared.store.all(state)
    }

    /// Health of every backend, keyed by name.
    ///
    /// Queries each breaker, so an open circuit past its recovery timeout
    /// reports healthy from here on.
    #[must_use]
    pub fn provider_health(&self) -> BTreeMap<String, ProviderHealth> {
        self.shared
            .routes
            .iter()
            .map(|route| {
                let is_open = route.breaker.is_open();
                (
                    route.name().to_string(),
                    ProviderHealth {
                        healthy: !is_open,
                        is_open,
                    },
                )
            })
            .collect()
    }

    #[must_use]
    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.shared.rate_limiter.status()
    }

    /// Statistics of the breaker guarding `backend`
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownBackend`] if no such backend exists.
    pub fn circuit_stats(&self, backend: &str) -> Result<CircuitBreakerStats, DispatchError> {
        self.route(backend).map(|route| route.breaker.stats())
    }

    /// Force the breaker of `backend` closed
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownBackend`] if no such backend exists.
    pub fn reset_circuit(&self, backend: &str) -> Result<(), DispatchError> {
        self.route(backend).map(|route| route.breaker.reset())
    }

    /// Empty the rate limit window
    pub fn reset_rate_limiter(&self) {
        self.shared.rate_limiter.reset();
    }

    /// Backend names in routing order
    #[must_use]
    pub fn backends(&self) -> Vec<&str> {
        self.shared.routes.iter().map(Route::name).collect()
    }

    /// Number of delivery loops still running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no delivery loop is running, for at most `timeout`.
    ///
    /// Returns `true` if everything finished in time. Running loops are never
    /// cancelled.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            while self.in_flight() > 0 {
                internal!(in_flight = self.in_flight(), "Waiting for deliveries to finish");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            internal!(
                level = WARN,
                in_flight = self.in_flight(),
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "Timed out waiting for deliveries to finish"
            );
        }
        drained
    }

    /// Wait for the delivery with `id` to reach a terminal state, for at most
    /// `timeout`.
    ///
    /// Returns the latest status either way, or `None` for an unknown id.
    pub async fn wait_for(&self, id: &DeliveryId, timeout: Duration) -> Option<DeliveryStatus> {
        let _ = tokio::time::timeout(timeout, async {
            while self
                .status_of(id)
                .is_some_and(|status| !status.state.is_terminal())
            {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await;

        self.status_of(id)
    }

    fn route(&self, backend: &str) -> Result<&Route, DispatchError> {
        self.shared
            .routes
            .iter()
            .find(|route| route.name() == backend)
            .ok_or_else(|| DispatchError::UnknownBackend(backend.to_string()))
    }
}

/// Decrements the in-flight counter when a delivery loop ends, however it ends
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Run the attempt loop of one delivery to `Sent` or `Failed`
#[tracing::instrument(level = "debug", skip_all, fields(id = %id))]
async fn deliver(shared: Arc<Shared>, id: DeliveryId, request: DeliveryRequest) {
    let _guard = InFlightGuard(&shared.in_flight);
    let max_retries = shared.retry.max_retries;
    let mut last_error = None;

    for attempt in 1..=max_retries {
        shared
            .store
            .update(&id, |status| status.begin_attempt(attempt));

        // Only a failure of the last backend in the list leads to a backoff
        let mut last_route_failed = false;

        for route in &shared.routes {
            last_route_failed = false;

            if route.breaker.is_open() {
                internal!(
                    level = DEBUG,
                    backend = route.name(),
                    attempt,
                    "Circuit open, skipping backend"
                );
                continue;
            }

            outgoing!(
                level = DEBUG,
                backend = route.name(),
                attempt,
                "Attempting delivery"
            );

            let outcome = route
                .breaker
                .execute(|| async { route.backend.send(&request).await?.into_result() })
                .await;

            match outcome {
                Ok(message_id) => {
                    shared
                        .store
                        .update(&id, |status| status.mark_sent(route.name(), message_id));
                    internal!(
                        level = INFO,
                        backend = route.name(),
                        attempt,
                        "Delivery sent"
                    );
                    return;
                }
                // Another loop took the half-open probe between the check and the call
                Err(error) if error.is_circuit_open() => {}
                Err(error) => {
                    outgoing!(
                        level = WARN,
                        backend = route.name(),
                        attempt,
                        error = %error,
                        "Backend failed"
                    );
                    last_error = Some(error);
                    last_route_failed = true;
                }
            }
        }

        if last_route_failed && shared.retry.has_next(attempt) {
            let delay = shared.retry.backoff_delay(attempt);
            internal!(
                level = DEBUG,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Backing off before next attempt"
            );
            tokio::time::sleep(delay).await;
        }
    }

    let error = last_error.unwrap_or(DispatchError::AllAttemptsExhausted);
    shared
        .store
        .update(&id, |status| status.mark_failed(error.to_string()));
    internal!(
        level = ERROR,
        attempts = max_retries,
        error = %error,
        "Delivery failed after all attempts"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backends::StaticBackend;

    fn dispatcher(backends: Vec<Arc<dyn DeliveryBackend>>) -> Result<Dispatcher, DispatchError> {
        Dispatcher::new(&DispatcherConfig::default(), backends)
    }

    #[test]
    fn test_new_requires_a_backend() {
        let error = dispatcher(Vec::new()).unwrap_err();
        assert!(matches!(error, DispatchError::Configuration(_)));
    }

    #[test]
    fn test_new_rejects_duplicate_names() {
        let error = dispatcher(vec![
            Arc::new(StaticBackend::accepting("same")),
            Arc::new(StaticBackend::failing("same", "down")),
        ])
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "Configuration error: duplicate backend name: same"
        );
    }

    #[test]
    fn test_new_rejects_zero_retries() {
        let mut config = DispatcherConfig::default();
        config.retry.max_retries = 0;
        let error =
            Dispatcher::new(&config, vec![Arc::new(StaticBackend::accepting("ok"))]).unwrap_err();
        assert!(matches!(error, DispatchError::Configuration(_)));
    }

    #[test]
    fn test_backends_keep_order() {
        let dispatcher = dispatcher(vec![
            Arc::new(StaticBackend::accepting("b")),
            Arc::new(StaticBackend::accepting("a")),
        ])
        .unwrap();
        assert_eq!(dispatcher.backends(), ["b", "a"]);
    }

    #[test]
    fn test_unknown_backend() {
        let dispatcher = dispatcher(vec![Arc::new(StaticBackend::accepting("ok"))]).unwrap();
        assert_eq!(
            dispatcher.reset_circuit("missing").unwrap_err(),
            DispatchError::UnknownBackend("missing".to_string())
        );
        assert!(dispatcher.circuit_stats("missing").is_err());
        assert!(dispatcher.circuit_stats("ok").is_ok());
    }

    #[tokio::test]
    async fn test_invalid_request_records_nothing() {
        let dispatcher = dispatcher(vec![Arc::new(StaticBackend::accepting("ok"))]).unwrap();

        let error = dispatcher
            .submit(DeliveryRequest::new("", "from@example.com", "Subject", "Body"))
            .unwrap_err();

        assert!(matches!(error, DispatchError::InvalidRequest(_)));
        assert!(dispatcher.statuses(None).is_empty());
        assert_eq!(dispatcher.rate_limit_status().remaining, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_returns_pending_then_sends() {
        let dispatcher = dispatcher(vec![Arc::new(StaticBackend::accepting("ok"))]).unwrap();
        let request = DeliveryRequest::new("to@example.com", "from@example.com", "Hi", "Body");

        let status = dispatcher.submit(request).unwrap();
        assert_eq!(status.state, DeliveryState::Pending);
        assert_eq!(status.attempts, 0);
        assert_eq!(dispatcher.in_flight(), 1);

        assert!(dispatcher.drain(Duration::from_secs(1)).await);
        let status = dispatcher.status_of(&status.id).unwrap();
        assert_eq!(status.state, DeliveryState::Sent);
        assert_eq!(status.backend_used.as_deref(), Some("ok"));
        assert!(status.backend_message_id.unwrap().starts_with("ok-"));
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_terminal_state() {
        let dispatcher = dispatcher(vec![Arc::new(StaticBackend::failing("down", "offline"))])
            .unwrap();
        let request = DeliveryRequest::new("to@example.com", "from@example.com", "Hi", "Body");
        let id = dispatcher.submit(request).unwrap().id;

        let status = dispatcher
            .wait_for(&id, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(status.state, DeliveryState::Failed);
        assert_eq!(status.error.as_deref(), Some("down: offline"));

        assert!(
            dispatcher
                .wait_for(&DeliveryId::from("unknown"), Duration::from_secs(1))
                .await
                .is_none()
        );
    }
}
