//! Capability contract of a delivery backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::BackendError, types::DeliveryRequest};

/// Answer of a backend that was reached.
///
/// A backend can fail in two ways: by returning an `Err` from
/// [`DeliveryBackend::send`], or by answering with `success = false`. The
/// dispatcher treats both as a failed trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    /// Backend side identifier of the accepted message
    #[serde(default)]
    pub message_id: Option<String>,
    /// Reason given with `success = false`
    #[serde(default)]
    pub error: Option<String>,
}

impl SendResult {
    #[must_use]
    pub fn accepted(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    #[must_use]
    pub fn refused(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }

    /// Fold `success = false` into an error so it counts as a failed trial.
    ///
    /// Returns the message id of an accepted message.
    pub fn into_result(self) -> Result<Option<String>, BackendError> {
        if self.success {
            Ok(self.message_id)
        } else {
            Err(BackendError::Rejected(
                self.error
                    .unwrap_or_else(|| "backend refused the message".to_string()),
            ))
        }
    }
}

/// A named destination that can attempt to deliver a request.
///
/// Implementations must be safe to call concurrently: many delivery loops may
/// be trying the same backend at once.
#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    /// Unique name, used for routing, circuit breaking and diagnostics
    fn name(&self) -> &str;

    /// Attempt to deliver `request`
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] when the backend could not be reached or
    /// failed while handling the request.
    async fn send(&self, request: &DeliveryRequest) -> Result<SendResult, BackendError>;
}
