//! Resilient dispatch of delivery requests over several backends
//!
//! This crate provides functionality to:
//! - Deduplicate identical requests by content fingerprint
//! - Cap global throughput with a sliding window rate limiter
//! - Isolate failing backends behind per-backend circuit breakers
//! - Retry across backends and attempts with exponential backoff
//! - Expose the evolving status of every delivery

mod backend;
pub mod backends;
mod circuit_breaker;
mod config;
mod dispatcher;
mod error;
mod idempotency;
mod rate_limiter;
mod retry;
mod store;
mod types;

// Re-export backend contract
pub use backend::{DeliveryBackend, SendResult};
// Re-export circuit breaker types
pub use circuit_breaker::{
    BackendCircuitConfig, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitOverride,
    CircuitState,
};
// Re-export core types
pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, ProviderHealth};
// Re-export error types
pub use error::{BackendError, DispatchError};
pub use idempotency::IdempotencyIndex;
pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use retry::RetryPolicy;
pub use store::StatusStore;
pub use types::{DeliveryId, DeliveryRequest, DeliveryState, DeliveryStatus};
