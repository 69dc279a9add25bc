//! Scripted walk through the dispatcher's behaviour
//!
//! 1. A single message
//! 2. The same message submitted twice more, to show idempotency
//! 3. A burst of distinct messages, to show rate limiting
//! 4. Once deliveries settle, status counts, backend health and rate limit

use std::{collections::BTreeMap, time::Duration};

use courier_common::internal;
use courier_dispatch::{
    DeliveryRequest, DeliveryState, DeliveryStatus, DispatchError, Dispatcher, ProviderHealth,
    RateLimitStatus,
};
use serde::Serialize;

/// Sender used when none is given
pub const DEFAULT_SENDER: &str = "noreply@example.com";

/// Counts of deliveries per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: usize,
    pub retrying: usize,
    pub sent: usize,
    pub failed: usize,
}

impl StateCounts {
    #[must_use]
    pub fn tally(statuses: &[DeliveryStatus]) -> Self {
        statuses
            .iter()
            .fold(Self::default(), |mut counts, status| {
                match status.state {
                    DeliveryState::Pending => counts.pending += 1,
                    DeliveryState::Retrying => counts.retrying += 1,
                    DeliveryState::Sent => counts.sent += 1,
                    DeliveryState::Failed => counts.failed += 1,
                }
                counts
            })
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.retrying + self.sent + self.failed
    }
}

/// Outcome of [`run`]
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    /// Final status of the single message
    pub single: Option<DeliveryStatus>,
    /// Whether both resubmissions returned the id of the first submission
    pub duplicates_collapsed: bool,
    pub burst_accepted: usize,
    pub burst_rate_limited: usize,
    /// Whether every delivery finished before the timeout
    pub drained: bool,
    pub counts: StateCounts,
    pub provider_health: BTreeMap<String, ProviderHealth>,
    pub rate_limit: RateLimitStatus,
}

fn message(subject: impl Into<String>, body: impl Into<String>) -> DeliveryRequest {
    DeliveryRequest::new("test@example.com", DEFAULT_SENDER, subject, body)
}

/// Run the demo scenario against `dispatcher`
pub async fn run(
    dispatcher: &Dispatcher,
    burst: usize,
    drain_timeout: Duration,
) -> Result<DemoReport, DispatchError> {
    internal!(level = INFO, "Submitting a single message");
    let single = dispatcher.submit(message("Test Subject", "Test Body"))?;

    internal!(level = INFO, "Resubmitting the same message");
    let duplicate = message("Test Subject", "Test Body").with_rich_content("<p>Test Body</p>");
    let first_again = dispatcher.submit(duplicate.clone())?;
    let second_again = dispatcher.submit(duplicate)?;
    let duplicates_collapsed = first_again.id == single.id && second_again.id == single.id;

    internal!(level = INFO, burst, "Submitting a burst of distinct messages");
    let mut burst_accepted = 0;
    let mut burst_rate_limited = 0;
    for n in 1..=burst {
        match dispatcher.submit(message(format!("Burst {n}"), format!("Burst message {n}"))) {
            Ok(_) => burst_accepted += 1,
            Err(error) if error.is_rate_limited() => burst_rate_limited += 1,
            Err(error) => return Err(error),
        }
    }

    let drained = dispatcher.drain(drain_timeout).await;

    Ok(DemoReport {
        single: dispatcher.status_of(&single.id),
        duplicates_collapsed,
        burst_accepted,
        burst_rate_limited,
        drained,
        counts: StateCounts::tally(&dispatcher.statuses(None)),
        provider_health: dispatcher.provider_health(),
        rate_limit: dispatcher.rate_limit_status(),
    })
}
