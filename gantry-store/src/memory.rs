//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! Thread-safe using RwLock for concurrent access; every operation takes
//! the lock exactly once, which makes it atomic from the callers' point
//! of view.

use crate::error::StoreError;
use crate::store::EventStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_domain::{CancelInfo, EventId, EventRecord, Target};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory event store for testing
pub struct MemoryStore {
    records: RwLock<HashMap<EventId, EventRecord>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self { records: RwLock::new(HashMap::new()) }
    }

    /// Get the number of records
    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Get the number of running records
    pub fn running_count(&self) -> usize {
        self.records.read().unwrap().values().filter(|r| r.running).count()
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert(&self, record: &EventRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap();
        if records.contains_key(&record.id) {
            return Err(StoreError::duplicate(record.id.to_string()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &EventId) -> Result<Option<EventRecord>, StoreError> {
        let records = self.records.read().unwrap();
        Ok(records.get(id).cloned())
    }

    async fn request_cancel(
        &self,
        id: &EventId,
        info: CancelInfo,
    ) -> Result<Option<EventRecord>, StoreError> {
        let mut records = self.records.write().unwrap();
        match records.get_mut(id) {
            // Historical records are immutable; only a running record
            // can be asked to cancel.
            Some(record) if record.running => {
                record.cancel_info = info;
                Ok(Some(record.clone()))
            },
            _ => Ok(None),
        }
    }

    async fn ack_cancel(
        &self,
        id: &EventId,
        ack_time: DateTime<Utc>,
    ) -> Result<Option<EventRecord>, StoreError> {
        let mut records = self.records.write().unwrap();
        match records.get_mut(id) {
            Some(record) if record.running && record.cancel_info.asked => {
                record.cancel_info.canceled = true;
                record.cancel_info.ack_time = Some(ack_time);
                Ok(Some(record.clone()))
            },
            _ => Ok(None),
        }
    }

    async fn remove_by_id(&self, id: &EventId) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap();
        if records.remove(id).is_some() {
            Ok(())
        } else {
            Err(StoreError::not_found(id.to_string()))
        }
    }

    async fn touch_running(
        &self,
        targets: &[Target],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap();
        for target in targets {
            if let Some(record) = records.get_mut(&EventId::Target(target.clone())) {
                record.lock_update_time = now;
            }
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<EventRecord>, StoreError> {
        let records = self.records.read().unwrap();
        let mut all: Vec<EventRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(all)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_domain::Target;
    use uuid::Uuid;

    fn create_running_record(name: &str, value: &str) -> EventRecord {
        let target = Target::new(name, value);
        let now = Utc::now();
        EventRecord {
            id: EventId::Target(target.clone()),
            target,
            kind: "app.deploy".to_string(),
            owner: "alice".to_string(),
            start_time: now,
            end_time: None,
            lock_update_time: now,
            start_custom_data: None,
            end_custom_data: None,
            cancelable: true,
            running: true,
            error: String::new(),
            log: None,
            cancel_info: CancelInfo::default(),
        }
    }

    fn asked_cancel_info() -> CancelInfo {
        CancelInfo {
            owner: "admin".to_string(),
            reason: "halt".to_string(),
            start_time: Some(Utc::now()),
            ack_time: None,
            asked: true,
            canceled: false,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryStore::new();
        let record = create_running_record("app", "a");

        store.insert(&record).await.unwrap();

        let found = store.find_by_id(&record.id).await.unwrap();
        assert_eq!(found.unwrap(), record);
    }

    #[tokio::test]
    async fn test_insert_duplicate_fails() {
        let store = MemoryStore::new();
        let record = create_running_record("app", "a");

        store.insert(&record).await.unwrap();

        let err = store.insert(&record).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_find_by_token_id() {
        let store = MemoryStore::new();
        let mut record = create_running_record("app", "a");
        record.id = EventId::Token(Uuid::now_v7());
        record.running = false;

        store.insert(&record).await.unwrap();

        let found = store.find_by_id(&record.id).await.unwrap();
        assert!(found.is_some());
        assert!(!found.unwrap().running);
    }

    #[tokio::test]
    async fn test_request_cancel_returns_updated() {
        let store = MemoryStore::new();
        let record = create_running_record("app", "a");
        store.insert(&record).await.unwrap();

        let updated = store
            .request_cancel(&record.id, asked_cancel_info())
            .await
            .unwrap()
            .unwrap();

        assert!(updated.cancel_info.asked);
        assert_eq!(updated.cancel_info.owner, "admin");
        assert_eq!(updated.cancel_info.reason, "halt");
    }

    #[tokio::test]
    async fn test_request_cancel_missing_record() {
        let store = MemoryStore::new();
        let id = EventId::Target(Target::new("app", "ghost"));

        let updated = store.request_cancel(&id, asked_cancel_info()).await.unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn test_ack_cancel_requires_ask() {
        let store = MemoryStore::new();
        let record = create_running_record("app", "a");
        store.insert(&record).await.unwrap();

        // No cancel asked yet: filter must not match
        let updated = store.ack_cancel(&record.id, Utc::now()).await.unwrap();
        assert!(updated.is_none());

        store.request_cancel(&record.id, asked_cancel_info()).await.unwrap();

        let updated = store.ack_cancel(&record.id, Utc::now()).await.unwrap().unwrap();
        assert!(updated.cancel_info.canceled);
        assert!(updated.cancel_info.ack_time.is_some());
    }

    #[tokio::test]
    async fn test_remove_by_id() {
        let store = MemoryStore::new();
        let record = create_running_record("app", "a");
        store.insert(&record).await.unwrap();

        store.remove_by_id(&record.id).await.unwrap();
        assert_eq!(store.record_count(), 0);

        let err = store.remove_by_id(&record.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_touch_running_refreshes_listed_targets() {
        let store = MemoryStore::new();
        let touched = create_running_record("app", "a");
        let untouched = create_running_record("app", "b");
        store.insert(&touched).await.unwrap();
        store.insert(&untouched).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(30);
        store.touch_running(&[touched.target.clone()], later).await.unwrap();

        let refreshed = store.find_by_id(&touched.id).await.unwrap().unwrap();
        assert_eq!(refreshed.lock_update_time, later);

        let stale = store.find_by_id(&untouched.id).await.unwrap().unwrap();
        assert_eq!(stale.lock_update_time, untouched.lock_update_time);
    }

    #[tokio::test]
    async fn test_touch_running_missing_target_is_noop() {
        let store = MemoryStore::new();
        store
            .touch_running(&[Target::new("app", "ghost")], Utc::now())
            .await
            .unwrap();
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_list_all_newest_first() {
        let store = MemoryStore::new();

        let mut old = create_running_record("app", "a");
        old.start_time = Utc::now() - chrono::Duration::hours(1);
        let recent = create_running_record("app", "b");

        store.insert(&old).await.unwrap();
        store.insert(&recent).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].target.value, "b");
        assert_eq!(all[1].target.value, "a");
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryStore::new();
        store.insert(&create_running_record("app", "a")).await.unwrap();
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.running_count(), 1);

        store.clear();
        assert_eq!(store.record_count(), 0);
    }
}
