//! Typed error handling for dispatch operations.
//!
//! Errors are split by who is expected to see them:
//! - [`DispatchError::RateLimitExceeded`] and [`DispatchError::InvalidRequest`]
//!   are returned synchronously from `submit`
//! - [`DispatchError::CircuitOpen`] and [`DispatchError::Backend`] are consumed
//!   by the delivery loop to drive fallback and retries
//! - [`DispatchError::AllAttemptsExhausted`] only ever ends up as the text of a
//!   failed [`DeliveryStatus`](crate::DeliveryStatus)

use std::time::Duration;

use thiserror::Error;

/// Failure reported by, or on behalf of, a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend call itself failed (network error, service down, ...).
    #[error("{0}")]
    Unavailable(String),

    /// The backend answered but refused to take the message.
    #[error("{0}")]
    Rejected(String),

    /// The call did not finish within the configured call timeout.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Top-level dispatch error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The global throughput cap is exhausted.
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// The backend's circuit breaker refused the trial without calling it.
    #[error("Circuit breaker is open for backend {backend}")]
    CircuitOpen { backend: String },

    /// The backend was called and failed.
    #[error("{backend}: {source}")]
    Backend {
        backend: String,
        #[source]
        source: BackendError,
    },

    /// Every attempt ran without any backend accepting the message.
    #[error("All providers failed")]
    AllAttemptsExhausted,

    /// No backend with the given name is configured.
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// The request is missing required content.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The dispatcher could not be built from its configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DispatchError {
    /// Returns `true` if the submission was refused by the rate limiter.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded)
    }

    /// Returns `true` if a breaker refused the trial.
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Returns `true` if another backend or a later attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::Backend { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(DispatchError::RateLimitExceeded.is_rate_limited());
        assert!(!DispatchError::RateLimitExceeded.is_retryable());

        let open = DispatchError::CircuitOpen {
            backend: "a".to_string(),
        };
        assert!(open.is_circuit_open());
        assert!(open.is_retryable());

        let failed = DispatchError::Backend {
            backend: "a".to_string(),
            source: BackendError::Unavailable("down".to_string()),
        };
        assert!(failed.is_retryable());
        assert!(!failed.is_circuit_open());

        assert!(!DispatchError::AllAttemptsExhausted.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let error = DispatchError::Backend {
            backend: "MockProviderA".to_string(),
            source: BackendError::Unavailable("Simulated network error".to_string()),
        };
        assert_eq!(error.to_string(), "MockProviderA: Simulated network error");

        let error = DispatchError::Backend {
            backend: "slow".to_string(),
            source: BackendError::Timeout(Duration::from_millis(5000)),
        };
        assert_eq!(error.to_string(), "slow: timed out after 5000ms");

        assert_eq!(
            DispatchError::RateLimitExceeded.to_string(),
            "rate limit exceeded"
        );
    }
}
