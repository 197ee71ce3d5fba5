//! The persisted event record and its cancellation sub-record.

use crate::target::{EventId, Target};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// CancelInfo
// =============================================================================

/// Cooperative cancellation state carried inside every record.
///
/// `asked` is set by the requester, `canceled` by the holder when it
/// acknowledges. `canceled` implies `asked`, and `ack_time` never
/// precedes `start_time`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelInfo {
    /// Principal that requested the cancellation
    pub owner: String,
    /// Human-readable reason given by the requester
    pub reason: String,
    /// When the cancellation was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the holder acknowledged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_time: Option<DateTime<Utc>>,
    /// A cancellation was requested
    pub asked: bool,
    /// The holder acknowledged the request
    pub canceled: bool,
}

// =============================================================================
// EventRecord
// =============================================================================

/// The single entity persisted by the subsystem.
///
/// While `running` the record is the lock row, keyed by its target and
/// mutated only through lease bumps and cancellation updates. Once
/// terminated it is re-inserted under an opaque token and never mutated
/// again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Target pair while running, opaque token once historical
    pub id: EventId,
    /// The target the event acts on, duplicated as a searchable field
    pub target: Target,
    /// Operation class, e.g. `"app.deploy"`
    pub kind: String,
    /// Principal that started the operation
    pub owner: String,
    /// When the operation started
    pub start_time: DateTime<Utc>,
    /// When the operation terminated; absent while running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Last lease refresh; advanced by the renewer, ignored once historical
    pub lock_update_time: DateTime<Utc>,
    /// Opaque payload captured at start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_custom_data: Option<serde_json::Value>,
    /// Opaque payload captured at termination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_custom_data: Option<serde_json::Value>,
    /// Whether the holder accepts cooperative cancellation
    pub cancelable: bool,
    /// `true` iff this record is the active lock
    pub running: bool,
    /// Terminal error message, empty on success
    pub error: String,
    /// Accumulated log output, snapshotted at termination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    /// Cooperative cancellation state
    pub cancel_info: CancelInfo,
}

impl EventRecord {
    /// Whether the lease is dead: `now` is past the last refresh plus
    /// the expiry timeout.
    pub fn lease_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        now > self.lock_update_time + timeout
    }

    /// Age of the lease at `now`.
    pub fn lease_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.lock_update_time
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) running {:?} start by {} at {}",
            self.target.name,
            self.target.value,
            self.kind,
            self.owner,
            self.start_time.to_rfc3339(),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn running_record() -> EventRecord {
        let target = Target::new("app", "my-app");
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

    #[test]
    fn test_record_roundtrip_running() {
        let record = running_record();
        let json = serde_json::to_string(&record).unwrap();
        let back: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_record_roundtrip_historical() {
        let mut record = running_record();
        record.id = EventId::Token(uuid::Uuid::now_v7());
        record.running = false;
        record.end_time = Some(Utc::now());
        record.end_custom_data = Some(serde_json::json!({"image": "v42"}));
        record.log = Some("step 1 ok\n".to_string());

        let json = serde_json::to_string(&record).unwrap();
        let back: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_unset_fields_omitted_from_wire() {
        let record = running_record();
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("endTime"));
        assert!(!json.contains("startCustomData"));
        assert!(!json.contains("endCustomData"));
        assert!(!json.contains("\"log\""));
        assert!(json.contains("lockUpdateTime"));
    }

    #[test]
    fn test_lease_expiry() {
        let mut record = running_record();
        let now = Utc::now();
        record.lock_update_time = now - Duration::minutes(6);
        assert!(record.lease_expired(Duration::minutes(5), now));

        record.lock_update_time = now - Duration::minutes(4);
        assert!(!record.lease_expired(Duration::minutes(5), now));
    }

    #[test]
    fn test_display_shows_target_kind_owner() {
        let record = running_record();
        let shown = record.to_string();
        assert!(shown.starts_with("app(my-app) running \"app.deploy\" start by alice at "));
    }

    #[test]
    fn test_cancel_info_default_is_unasked() {
        let info = CancelInfo::default();
        assert!(!info.asked);
        assert!(!info.canceled);
        assert!(info.start_time.is_none());
        assert!(info.ack_time.is_none());
    }
}
