//! Store trait definition (Port)
//!
//! The trait is the storage interface for the event subsystem.
//! Implementations can be PostgreSQL or in-memory for testing. Every
//! conditional update must map to one native atomic operation of the
//! backing store; client-side read-modify-write loops are not allowed,
//! mutual exclusion correctness depends on it.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_domain::{CancelInfo, EventId, EventRecord, Target};

/// Port over a single logical collection of event records.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a record, failing with [`StoreError::Duplicate`] when a
    /// record with the same id already exists. This is the primitive the
    /// lock acquisition rides on.
    async fn insert(&self, record: &EventRecord) -> Result<(), StoreError>;

    /// Find a record by id.
    async fn find_by_id(&self, id: &EventId) -> Result<Option<EventRecord>, StoreError>;

    /// Atomically overwrite the cancellation sub-record of the running
    /// record keyed by `id`, returning the updated record. `None` when no
    /// such record exists.
    async fn request_cancel(
        &self,
        id: &EventId,
        info: CancelInfo,
    ) -> Result<Option<EventRecord>, StoreError>;

    /// Atomically acknowledge a previously requested cancellation on the
    /// running record keyed by `id`, returning the updated record. `None`
    /// when the record is gone or no cancellation was asked.
    async fn ack_cancel(
        &self,
        id: &EventId,
        ack_time: DateTime<Utc>,
    ) -> Result<Option<EventRecord>, StoreError>;

    /// Remove a record by id, failing with [`StoreError::NotFound`] when
    /// absent.
    async fn remove_by_id(&self, id: &EventId) -> Result<(), StoreError>;

    /// Refresh the lease timestamp of every running record whose target
    /// is in `targets`. Atomicity across targets is not required.
    async fn touch_running(
        &self,
        targets: &[Target],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// All records, running and historical, newest first.
    async fn list_all(&self) -> Result<Vec<EventRecord>, StoreError>;
}
