//! Request and status types shared by the dispatcher and its stores

use core::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DispatchError;

/// Number of hex characters kept from the content digest
const FINGERPRINT_LEN: usize = 16;

/// Deterministic identifier of a delivery request.
///
/// Derived from the destination, subject and body only, so it doubles as the
/// idempotency key: byte-identical submissions collapse onto the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(String);

impl DeliveryId {
    /// Wrap an already computed identifier, e.g. one received from a caller
    /// polling for status.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeliveryId {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

impl From<&str> for DeliveryId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// An immutable "send this message" request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    /// Recipient address
    pub destination: String,
    /// Sender address, not part of the fingerprint
    pub sender: String,
    pub subject: String,
    pub body: String,
    /// Optional HTML alternative of `body`, not part of the fingerprint
    #[serde(default)]
    pub rich_content: Option<String>,
}

impl DeliveryRequest {
    #[must_use]
    pub fn new(
        destination: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            rich_content: None,
        }
    }

    #[must_use]
    pub fn with_rich_content(mut self, html: impl Into<String>) -> Self {
        self.rich_content = Some(html.into());
        self
    }

    /// Compute the content fingerprint.
    ///
    /// Each field is length-prefixed before hashing so that moving characters
    /// between fields always changes the digest.
    #[must_use]
    pub fn fingerprint(&self) -> DeliveryId {
        let mut hasher = Sha256::new();
        for field in [&self.destination, &self.subject, &self.body] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(FINGERPRINT_LEN);
        DeliveryId(digest)
    }

    /// Reject requests missing any of the fingerprinted fields.
    pub fn validate(&self) -> Result<(), DispatchError> {
        let missing: Vec<&str> = [
            ("destination", &self.destination),
            ("subject", &self.subject),
            ("body", &self.body),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::InvalidRequest(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Lifecycle of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Accepted, first attempt not yet finished
    Pending,
    /// A second or later attempt is under way
    Retrying,
    /// Accepted by a backend
    Sent,
    /// Terminal failure
    Failed,
}

impl DeliveryState {
    /// Returns `true` once no further transitions will happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl Display for DeliveryState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Sent => "sent",
            Self::Failed => "failed",
        })
    }
}

/// Latest known state of a delivery.
///
/// One record exists per distinct [`DeliveryId`]; it is overwritten in place
/// as attempts progress, so readers always see a snapshot, never a history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub id: DeliveryId,
    pub state: DeliveryState,
    /// Attempt currently running or last run, `0` before the first attempt
    pub attempts: u32,
    /// Name of the backend that accepted the message
    pub backend_used: Option<String>,
    /// Message id reported by that backend
    pub backend_message_id: Option<String>,
    /// Human readable reason of a failure
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryStatus {
    /// Fresh status for a newly accepted request
    #[must_use]
    pub fn pending(id: DeliveryId) -> Self {
        Self {
            id,
            state: DeliveryState::Pending,
            attempts: 0,
            backend_used: None,
            backend_message_id: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Start attempt number `attempt` (1-indexed)
    pub fn begin_attempt(&mut self, attempt: u32) {
        self.attempts = attempt;
        self.state = if attempt > 1 {
            DeliveryState::Retrying
        } else {
            DeliveryState::Pending
        };
        self.updated_at = Utc::now();
    }

    pub fn mark_sent(&mut self, backend: &str, message_id: Option<String>) {
        self.state = DeliveryState::Sent;
        self.backend_used = Some(backend.to_string());
        self.backend_message_id = message_id;
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = DeliveryState::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request() -> DeliveryRequest {
        DeliveryRequest::new(
            "test@example.com",
            "sender@example.com",
            "Test Subject",
            "Test Body",
        )
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(request().fingerprint(), request().fingerprint());
        assert_eq!(request().fingerprint().as_str().len(), FINGERPRINT_LEN);
    }

    #[test]
    fn test_fingerprint_ignores_sender_and_rich_content() {
        let mut other = request().with_rich_content("<p>Test Body</p>");
        other.sender = "someone-else@example.com".to_string();
        assert_eq!(request().fingerprint(), other.fingerprint());
    }

    #[test]
    fn test_fingerprint_differs_per_field() {
        let base = request().fingerprint();

        let mut to = request();
        to.destination = "other@example.com".to_string();
        let mut subject = request();
        subject.subject = "Subject 2".to_string();
        let mut body = request();
        body.body = "Other Body".to_string();

        assert_ne!(base, to.fingerprint());
        assert_ne!(base, subject.fingerprint());
        assert_ne!(base, body.fingerprint());
    }

    #[test]
    fn test_fingerprint_field_boundaries_matter() {
        let a = DeliveryRequest::new("a-b", "s", "c", "d");
        let b = DeliveryRequest::new("a", "s", "b-c", "d");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        assert!(request().validate().is_ok());

        let empty = DeliveryRequest::new("", "s", "  ", "body");
        let err = empty.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid request: missing required fields: destination, subject"
        );
    }

    #[test]
    fn test_status_transitions() {
        let mut status = DeliveryStatus::pending(request().fingerprint());
        assert_eq!(status.state, DeliveryState::Pending);
        assert_eq!(status.attempts, 0);

        status.begin_attempt(1);
        assert_eq!(status.state, DeliveryState::Pending);
        status.begin_attempt(2);
        assert_eq!(status.state, DeliveryState::Retrying);
        assert_eq!(status.attempts, 2);

        status.mark_sent("ProviderB", Some("ProviderB-1".to_string()));
        assert_eq!(status.state, DeliveryState::Sent);
        assert!(status.state.is_terminal());
        assert_eq!(status.backend_used.as_deref(), Some("ProviderB"));
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = ron::to_string(&DeliveryState::Retrying).unwrap();
        assert_eq!(json, "retrying");
    }
}
