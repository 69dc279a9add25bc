use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{
    backend::{DeliveryBackend, SendResult},
    error::BackendError,
    types::DeliveryRequest,
};

/// Outcome a [`StaticBackend`] always produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaticBehavior {
    /// Accept every message
    Accept,
    /// Fail every call with the given reason
    Fail(String),
    /// Answer every call with `success = false` and the given reason
    Refuse(String),
}

/// Settings of a [`StaticBackend`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConfig {
    pub name: String,
    pub behavior: StaticBehavior,
}

/// Backend with a fixed, immediate outcome
#[derive(Debug, Clone)]
pub struct StaticBackend {
    config: StaticConfig,
}

impl StaticBackend {
    #[must_use]
    pub const fn new(config: StaticConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn accepting(name: impl Into<String>) -> Self {
        Self::new(StaticConfig {
            name: name.into(),
            behavior: StaticBehavior::Accept,
        })
    }

    #[must_use]
    pub fn failing(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(StaticConfig {
            name: name.into(),
            behavior: StaticBehavior::Fail(reason.into()),
        })
    }

    #[must_use]
    pub fn refusing(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(StaticConfig {
            name: name.into(),
            behavior: StaticBehavior::Refuse(reason.into()),
        })
    }
}

#[async_trait]
impl DeliveryBackend for StaticBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn send(&self, _request: &DeliveryRequest) -> Result<SendResult, BackendError> {
        match &self.config.behavior {
            StaticBehavior::Accept => Ok(SendResult::accepted(format!(
                "{}-{}",
                self.config.name,
                Ulid::new()
            ))),
            StaticBehavior::Fail(reason) => Err(BackendError::Unavailable(reason.clone())),
            StaticBehavior::Refuse(reason) => Ok(SendResult::refused(reason.clone())),
        }
    }
}
