//! In-memory delivery status store

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};

use crate::types::{DeliveryId, DeliveryState, DeliveryStatus};

/// Latest [`DeliveryStatus`] of every delivery, keyed by [`DeliveryId`].
///
/// Records live for the lifetime of the process. Readers always receive a
/// cloned snapshot, never a reference into the map.
#[derive(Debug, Clone, Default)]
pub struct StatusStore {
    /// Map of delivery ids to their latest status (lock-free concurrent access)
    statuses: Arc<DashMap<DeliveryId, DeliveryStatus>>,
}

impl StatusStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the status stored for `id`
    pub fn get(&self, id: &DeliveryId) -> Option<DeliveryStatus> {
        self.statuses.get(id).map(|entry| entry.value().clone())
    }

    /// Insert or overwrite the status of `status.id`
    pub fn insert(&self, status: DeliveryStatus) {
        self.statuses.insert(status.id.clone(), status);
    }

    /// Atomically return the existing status for `id`, or store a fresh
    /// pending one and return `None`.
    ///
    /// Two racing callers with the same id can never both get `None`.
    pub fn reserve(&self, id: &DeliveryId) -> Option<DeliveryStatus> {
        match self.statuses.entry(id.clone()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(DeliveryStatus::pending(id.clone()));
                None
            }
        }
    }

    /// Mutate the status of `id` in place, returning the updated snapshot.
    ///
    /// Returns `None` when nothing is stored for `id`.
    pub fn update(
        &self,
        id: &DeliveryId,
        mutate: impl FnOnce(&mut DeliveryStatus),
    ) -> Option<DeliveryStatus> {
        self.statuses.get_mut(id).map(|mut entry| {
            mutate(entry.value_mut());
            entry.value().clone()
        })
    }

    /// Snapshots of all statuses, optionally only those in `state`
    pub fn all(&self, state: Option<DeliveryState>) -> Vec<DeliveryStatus> {
        self.statuses
            .iter()
            .filter(|entry| state.is_none_or(|state| entry.value().state == state))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}
