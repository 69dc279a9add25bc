//! Shared fixtures for dispatcher integration tests
#![allow(dead_code, clippy::expect_used)] // Test utility module - not all helpers used in every test

pub mod scripted;

use std::sync::Arc;

use courier_dispatch::{
    CircuitOverride, DeliveryBackend, DeliveryRequest, Dispatcher, DispatcherConfig,
};

pub use scripted::{Outcome, ScriptedBackend};

/// Distinct request number `n`
pub fn request(n: usize) -> DeliveryRequest {
    DeliveryRequest::new(
        "test@example.com",
        "noreply@example.com",
        format!("Test Subject {n}"),
        "Test Body",
    )
}

/// Configuration with a generous rate limit and no call timeout
pub fn config() -> DispatcherConfig {
    let mut config = DispatcherConfig::default();
    config.rate_limit.max_requests = 1_000;
    config.circuit_breaker.call_timeout_ms = None;
    config
}

/// Add a breaker override for `backend`
pub fn with_breaker(
    mut config: DispatcherConfig,
    backend: &str,
    failure_threshold: u32,
    recovery_timeout_ms: u64,
) -> DispatcherConfig {
    config.circuit_breaker.backend_overrides.insert(
        backend.to_string(),
        CircuitOverride {
            failure_threshold: Some(failure_threshold),
            recovery_timeout_ms: Some(recovery_timeout_ms),
            call_timeout_ms: None,
        },
    );
    config
}

pub fn dispatcher(config: &DispatcherConfig, backends: &[Arc<ScriptedBackend>]) -> Dispatcher {
    let backends = backends
        .iter()
        .map(|backend| Arc::clone(backend) as Arc<dyn DeliveryBackend>)
        .collect();
    Dispatcher::new(config, backends).expect("valid dispatcher configuration")
}
