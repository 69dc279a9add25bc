//! Recognition of resubmitted requests

use crate::{
    store::StatusStore,
    types::{DeliveryId, DeliveryStatus},
};

/// Maps request fingerprints onto existing deliveries.
///
/// Backed by the [`StatusStore`] itself: a fingerprint has been seen exactly
/// when a status is stored under it.
#[derive(Debug, Clone)]
pub struct IdempotencyIndex {
    store: StatusStore,
}

impl IdempotencyIndex {
    #[must_use]
    pub const fn new(store: StatusStore) -> Self {
        Self { store }
    }

    /// Return the status of an earlier submission with this fingerprint, or
    /// reserve the fingerprint for a new delivery and return `None`.
    ///
    /// The returned status may belong to a delivery that is still in flight.
    pub fn lookup_or_reserve(&self, fingerprint: &DeliveryId) -> Option<DeliveryStatus> {
        self.store.reserve(fingerprint)
    }

    /// Whether a delivery with this fingerprint exists
    pub fn contains(&self, fingerprint: &DeliveryId) -> bool {
        self.store.get(fingerprint).is_some()
    }
}
