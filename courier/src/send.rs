//! Submission of a single message

use std::time::Duration;

use courier_common::internal;
use courier_dispatch::{DeliveryRequest, DeliveryStatus, DispatchError, Dispatcher};

/// Submit `request` and return its status once delivery has settled.
///
/// With `wait` the status is polled until it is terminal. Otherwise every
/// delivery in flight is drained first. Either way the latest recorded status
/// is returned, which is still non-terminal if `timeout` ran out.
///
/// # Errors
///
/// Errors of [`Dispatcher::submit`]
pub async fn run(
    dispatcher: &Dispatcher,
    request: DeliveryRequest,
    wait: bool,
    timeout: Duration,
) -> Result<DeliveryStatus, DispatchError> {
    let accepted = dispatcher.submit(request)?;

    if wait {
        return Ok(dispatcher
            .wait_for(&accepted.id, timeout)
            .await
            .unwrap_or(accepted));
    }

    if !dispatcher.drain(timeout).await {
        internal!(
            level = WARN,
            id = %accepted.id,
            "Delivery still running after the drain timeout"
        );
    }
    Ok(dispatcher.status_of(&accepted.id).unwrap_or(accepted))
}
