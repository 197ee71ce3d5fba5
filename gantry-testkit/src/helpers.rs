//! Seeding helpers and the audit-trail checker.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use gantry_domain::{CancelInfo, EventId, EventRecord, Target};
use gantry_store::EventStore;
use uuid::Uuid;

/// Description of an expected historical event.
///
/// Unset optional fields match anything.
#[derive(Debug, Clone)]
pub struct EventDesc {
    /// Target the event acted on
    pub target: Target,
    /// Operation class
    pub kind: String,
    /// Principal that ran the operation
    pub owner: String,
    /// Substring expected in the terminal error message
    pub error_contains: Option<String>,
    /// Substring expected in the accumulated log
    pub log_contains: Option<String>,
}

impl EventDesc {
    /// Describe an event by its mandatory fields.
    pub fn new(target: Target, kind: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            target,
            kind: kind.into(),
            owner: owner.into(),
            error_contains: None,
            log_contains: None,
        }
    }

    /// Expect the terminal error to contain `needle`.
    pub fn with_error(mut self, needle: impl Into<String>) -> Self {
        self.error_contains = Some(needle.into());
        self
    }

    /// Expect the log to contain `needle`.
    pub fn with_log(mut self, needle: impl Into<String>) -> Self {
        self.log_contains = Some(needle.into());
        self
    }

    fn matches(&self, record: &EventRecord) -> bool {
        !record.running
            && record.target == self.target
            && record.kind == self.kind
            && record.owner == self.owner
            && self
                .error_contains
                .as_deref()
                .is_none_or(|needle| record.error.contains(needle))
            && self
                .log_contains
                .as_deref()
                .is_none_or(|needle| record.log.as_deref().unwrap_or("").contains(needle))
    }
}

/// Whether exactly one historical event matching `desc` exists.
///
/// Errors when the description is ambiguous (more than one match).
pub async fn has_event(store: &dyn EventStore, desc: &EventDesc) -> Result<bool> {
    let all = store.list_all().await?;
    let count = all.iter().filter(|record| desc.matches(record)).count();
    match count {
        0 => Ok(false),
        1 => Ok(true),
        n => bail!("{} events match description {:?}", n, desc),
    }
}

/// Insert a running record with an explicit lease timestamp.
///
/// Backdating `lock_update_time` is the way expiry scenarios are staged.
pub async fn seed_running_event(
    store: &dyn EventStore,
    target: Target,
    kind: &str,
    owner: &str,
    lock_update_time: DateTime<Utc>,
) -> Result<EventRecord> {
    let record = EventRecord {
        id: EventId::Target(target.clone()),
        target,
        kind: kind.to_string(),
        owner: owner.to_string(),
        start_time: lock_update_time,
        end_time: None,
        lock_update_time,
        start_custom_data: None,
        end_custom_data: None,
        cancelable: false,
        running: true,
        error: String::new(),
        log: None,
        cancel_info: CancelInfo::default(),
    };
    store.insert(&record).await?;
    Ok(record)
}

/// Insert a terminated record under a fresh token id.
pub async fn seed_historical_event(
    store: &dyn EventStore,
    target: Target,
    kind: &str,
    owner: &str,
) -> Result<EventRecord> {
    let start = Utc::now();
    let record = EventRecord {
        id: EventId::Token(Uuid::now_v7()),
        target,
        kind: kind.to_string(),
        owner: owner.to_string(),
        start_time: start,
        end_time: Some(start),
        lock_update_time: start,
        start_custom_data: None,
        end_custom_data: None,
        cancelable: false,
        running: false,
        error: String::new(),
        log: None,
        cancel_info: CancelInfo::default(),
    };
    store.insert(&record).await?;
    Ok(record)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_store::MemoryStore;

    #[tokio::test]
    async fn test_has_event_matches_single_historical() {
        let store = MemoryStore::new();
        let target = Target::new("app", "a");
        seed_historical_event(&store, target.clone(), "app.deploy", "alice").await.unwrap();

        let desc = EventDesc::new(target.clone(), "app.deploy", "alice");
        assert!(has_event(&store, &desc).await.unwrap());

        let other = EventDesc::new(target, "app.remove", "alice");
        assert!(!has_event(&store, &other).await.unwrap());
    }

    #[tokio::test]
    async fn test_has_event_ignores_running_records() {
        let store = MemoryStore::new();
        let target = Target::new("app", "a");
        seed_running_event(&store, target.clone(), "app.deploy", "alice", Utc::now())
            .await
            .unwrap();

        let desc = EventDesc::new(target, "app.deploy", "alice");
        assert!(!has_event(&store, &desc).await.unwrap());
    }

    #[tokio::test]
    async fn test_has_event_ambiguous_is_an_error() {
        let store = MemoryStore::new();
        let target = Target::new("app", "a");
        seed_historical_event(&store, target.clone(), "app.deploy", "alice").await.unwrap();
        seed_historical_event(&store, target.clone(), "app.deploy", "alice").await.unwrap();

        let desc = EventDesc::new(target, "app.deploy", "alice");
        assert!(has_event(&store, &desc).await.is_err());
    }
}
