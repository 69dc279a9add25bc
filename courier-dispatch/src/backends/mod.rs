//! Delivery backend implementations
//!
//! - `simulated`: Random failures and latency, for demos and load testing
//! - `fixed`: Fixed outcome, for tests and wiring checks

pub mod fixed;
pub mod simulated;

use std::sync::Arc;

pub use fixed::{StaticBackend, StaticBehavior, StaticConfig};
use serde::{Deserialize, Serialize};
pub use simulated::{SimulatedBackend, SimulatedConfig};

use crate::{backend::DeliveryBackend, error::DispatchError};

/// Configuration of one backend
///
/// This enum allows runtime selection of the backend implementation through
/// configuration files.
///
/// # Examples
///
/// ```ron
/// backends: [
///     Simulated(
///         name: "MockProviderA",
///         failure_rate: 0.3,
///     ),
///     Static(
///         name: "Fallback",
///         behavior: Accept,
///     ),
/// ]
/// ```
///
/// The unparenthesised variant form requires the `unwrap_variant_newtypes`
/// RON extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendConfig {
    Simulated(SimulatedConfig),
    Static(StaticConfig),
}

impl BackendConfig {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Simulated(config) => &config.name,
            Self::Static(config) => &config.name,
        }
    }

    /// Check the backend's settings
    ///
    /// # Errors
    ///
    /// [`DispatchError::Configuration`] describing the first invalid setting
    pub fn validate(&self) -> Result<(), DispatchError> {
        match self {
            Self::Simulated(config) => config.validate(),
            Self::Static(_) => Ok(()),
        }
    }

    /// Instantiate the configured backend
    #[must_use]
    pub fn build(&self) -> Arc<dyn DeliveryBackend> {
        match self {
            Self::Simulated(config) => Arc::new(SimulatedBackend::new(config.clone())),
            Self::Static(config) => Arc::new(StaticBackend::new(config.clone())),
        }
    }

    /// The two simulated providers used when nothing is configured
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::Simulated(SimulatedConfig::provider_a()),
            Self::Simulated(SimulatedConfig::provider_b()),
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_from_config_format() {
        let config_str = r#"[
            Simulated(
                name: "MockProviderA",
                failure_rate: 0.3,
            ),
            Static(
                name: "Fallback",
                behavior: Refuse("quota exhausted"),
            ),
        ]"#;

        let backends: Vec<BackendConfig> = ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::UNWRAP_VARIANT_NEWTYPES)
            .from_str(config_str)
            .unwrap();

        assert_eq!(backends.len(), 2);
        assert_eq!(backends[0].name(), "MockProviderA");
        assert_eq!(
            backends[1],
            BackendConfig::Static(StaticConfig {
                name: "Fallback".to_string(),
                behavior: StaticBehavior::Refuse("quota exhausted".to_string()),
            })
        );
        assert_eq!(backends[1].build().name(), "Fallback");
    }

    #[test]
    fn test_defaults_match_builtin_providers() {
        let names: Vec<String> = BackendConfig::defaults()
            .iter()
            .map(|config| config.build().name().to_string())
            .collect();
        assert_eq!(names, ["MockProviderA", "MockProviderB"]);
    }
}
