//! Terminal transition from running lock to historical record.
//!
//! The active row keyed by the target is removed and an immutable twin
//! is inserted under a fresh opaque token, so the target's uniqueness
//! constraint is preserved no matter what happens on the same target
//! afterwards.

use crate::error::Result;
use crate::renewer::RenewerHandle;
use chrono::Utc;
use gantry_domain::{EventId, EventRecord};
use gantry_store::EventStore;
use uuid::Uuid;

/// Terminate an event record.
///
/// With `abort` the active row is simply dropped and no history is
/// written. Otherwise the record gets its terminal fields and moves to
/// the audit history under a fresh token id.
pub(crate) async fn finish(
    store: &dyn EventStore,
    renewer: &RenewerHandle,
    mut data: EventRecord,
    log: String,
    err: Option<&str>,
    custom_data: Option<serde_json::Value>,
    abort: bool,
) -> Result<()> {
    // Unregister before touching the store, so no lease bump can race
    // with the rewrite below.
    renewer.remove(data.target.clone());

    if abort {
        store.remove_by_id(&data.id).await?;
        return Ok(());
    }

    if let Some(message) = err {
        data.error = message.to_string();
    } else if data.cancel_info.canceled {
        data.error = "canceled by user request".to_string();
    }
    data.end_time = Some(Utc::now());
    data.end_custom_data = custom_data;
    data.running = false;
    if !log.is_empty() {
        data.log = Some(log);
    }

    // If the insert below fails after the remove succeeded, this event's
    // history is lost: at-most-once history is the accepted guarantee.
    store.remove_by_id(&data.id).await?;
    data.id = EventId::Token(Uuid::now_v7());
    store.insert(&data).await?;
    Ok(())
}
