use serde::{Deserialize, Serialize};

use crate::{circuit_breaker::CircuitBreakerConfig, rate_limiter::RateLimitConfig, retry::RetryPolicy};

/// Configuration of a [`Dispatcher`](crate::Dispatcher)
///
/// # Examples
///
/// ```ron
/// dispatcher: (
///     rate_limit: (
///         max_requests: 10,
///         window_ms: 60000,
///     ),
///     circuit_breaker: (
///         failure_threshold: 5,
///         recovery_timeout_ms: 30000,
///         call_timeout_ms: 5000,
///     ),
///     retry: (
///         max_retries: 3,
///         base_delay_ms: 1000,
///     ),
/// )
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Global admission limit
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Breaker settings applied to every backend
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Attempts per delivery and the backoff between them
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: DispatcherConfig = ron::from_str("()").unwrap();
        assert_eq!(config, DispatcherConfig::default());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config_str = r#"(
            rate_limit: (max_requests: 2),
            circuit_breaker: (
                failure_threshold: 3,
                call_timeout_ms: None,
                backend_overrides: {
                    "MockProviderB": (
                        failure_threshold: Some(1),
                        recovery_timeout_ms: Some(500),
                    ),
                },
            ),
            retry: (max_retries: 5),
        )"#;

        let config: DispatcherConfig = ron::from_str(config_str).unwrap();

        assert_eq!(config.rate_limit.max_requests, 2);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.call_timeout_ms, None);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 1_000);

        let override_b = config.circuit_breaker.for_backend("MockProviderB");
        assert_eq!(override_b.failure_threshold, 1);
        assert_eq!(override_b.recovery_timeout_ms, 500);
        assert_eq!(override_b.call_timeout_ms, None);
    }
}
