use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{
    backend::{DeliveryBackend, SendResult},
    error::{BackendError, DispatchError},
    types::DeliveryRequest,
};

/// Settings of a [`SimulatedBackend`]
///
/// # Examples
///
/// ```ron
/// Simulated(
///     name: "MockProviderA",
///     failure_rate: 0.3,
///     min_latency_ms: 100,
///     max_latency_ms: 300,
///     failure_reason: "network error",
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedConfig {
    pub name: String,

    /// Probability in `[0, 1]` that a call fails
    #[serde(default)]
    pub failure_rate: f64,

    #[serde(default = "default_min_latency_ms")]
    pub min_latency_ms: u64,

    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,

    /// Text of a simulated failure, reported as `Simulated <reason>`
    #[serde(default = "default_failure_reason")]
    pub failure_reason: String,
}

impl SimulatedConfig {
    /// Settings of `MockProviderA`
    #[must_use]
    pub fn provider_a() -> Self {
        Self {
            name: "MockProviderA".to_string(),
            failure_rate: 0.3,
            min_latency_ms: 100,
            max_latency_ms: 300,
            failure_reason: "network error".to_string(),
        }
    }

    /// Settings of `MockProviderB`
    #[must_use]
    pub fn provider_b() -> Self {
        Self {
            name: "MockProviderB".to_string(),
            failure_rate: 0.2,
            min_latency_ms: 150,
            max_latency_ms: 450,
            failure_reason: "service unavailable".to_string(),
        }
    }

    /// Check that `failure_rate` is a probability
    ///
    /// # Errors
    ///
    /// [`DispatchError::Configuration`] if the rate is NaN or outside `[0, 1]`
    pub fn validate(&self) -> Result<(), DispatchError> {
        if (0.0..=1.0).contains(&self.failure_rate) {
            Ok(())
        } else {
            Err(DispatchError::Configuration(format!(
                "failure_rate of {} must be between 0 and 1, got {}",
                self.name, self.failure_rate
            )))
        }
    }
}

const fn default_min_latency_ms() -> u64 {
    100
}

const fn default_max_latency_ms() -> u64 {
    300
}

fn default_failure_reason() -> String {
    "network error".to_string()
}

/// Backend that fails at random after a random latency.
///
/// Accepted messages get an id of the form `<name>-<ulid>`.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    config: SimulatedConfig,
}

impl SimulatedBackend {
    #[must_use]
    pub const fn new(config: SimulatedConfig) -> Self {
        Self { config }
    }

    /// Primary demo backend: fails 30% of calls with a network error
    #[must_use]
    pub fn provider_a() -> Self {
        Self::new(SimulatedConfig::provider_a())
    }

    /// Secondary demo backend: fails 20% of calls as unavailable
    #[must_use]
    pub fn provider_b() -> Self {
        Self::new(SimulatedConfig::provider_b())
    }

    /// Pick the latency and outcome of one call
    fn roll(&self) -> (Duration, bool) {
        let mut rng = rand::rng();
        let low = self.config.min_latency_ms;
        let high = self.config.max_latency_ms.max(low);
        let latency = Duration::from_millis(rng.random_range(low..=high));
        let rate = if self.config.failure_rate.is_nan() {
            1.0
        } else {
            self.config.failure_rate.clamp(0.0, 1.0)
        };
        let fails = rng.random_bool(rate);
        (latency, fails)
    }
}

#[async_trait]
impl DeliveryBackend for SimulatedBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn send(&self, request: &DeliveryRequest) -> Result<SendResult, BackendError> {
        let (latency, fails) = self.roll();
        tokio::time::sleep(latency).await;

        if fails {
            return Err(BackendError::Unavailable(format!(
                "Simulated {}",
                self.config.failure_reason
            )));
        }

        tracing::trace!(
            backend = %self.config.name,
            destination = %request.destination,
            "Simulated delivery accepted"
        );
        Ok(SendResult::accepted(format!(
            "{}-{}",
            self.config.name,
            Ulid::new()
        )))
    }
}
