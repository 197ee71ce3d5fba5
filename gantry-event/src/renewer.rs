//! Lease renewal worker.
//!
//! A single background task owns the set of locally-held targets and
//! periodically refreshes their lease timestamps in the store, keeping
//! the locks alive while their holders work. Registration goes through
//! one channel carrying add/remove messages, which preserves the order
//! of operations issued by any one caller. The task never reads the set
//! from outside and store failures only skip one refresh round.

use chrono::Utc;
use gantry_domain::Target;
use gantry_store::EventStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Registration message for the renewer task.
#[derive(Debug)]
enum Registration {
    Add(Target),
    Remove(Target),
}

/// Handle to the renewer task. Cheap to clone; all clones feed the same
/// task.
#[derive(Clone)]
pub(crate) struct RenewerHandle {
    tx: mpsc::UnboundedSender<Registration>,
    shutdown: CancellationToken,
}

impl RenewerHandle {
    /// Spawn the renewer task and return its handle.
    pub(crate) fn spawn(store: Arc<dyn EventStore>, tick: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(run(store, tick, rx, shutdown.clone()));
        Self { tx, shutdown }
    }

    /// Register a target for lease renewal. Never blocks.
    pub(crate) fn add(&self, target: Target) {
        let _ = self.tx.send(Registration::Add(target));
    }

    /// Drop a target from lease renewal. Never blocks.
    pub(crate) fn remove(&self, target: Target) {
        let _ = self.tx.send(Registration::Remove(target));
    }

    /// Stop the renewer task. Used on teardown; in production the task
    /// runs for the process lifetime.
    pub(crate) fn stop(&self) {
        self.shutdown.cancel();
    }
}

async fn run(
    store: Arc<dyn EventStore>,
    tick: Duration,
    mut rx: mpsc::UnboundedReceiver<Registration>,
    shutdown: CancellationToken,
) {
    let mut held: HashSet<Target> = HashSet::new();
    let mut ticker = interval(tick);
    ticker.tick().await; // First tick is immediate

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(registration) => apply(&mut held, registration),
                // All senders dropped: the subsystem is gone.
                None => break,
            },
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {},
        }

        // Drain the backlog so one refresh covers every pending change.
        while let Ok(registration) = rx.try_recv() {
            apply(&mut held, registration);
        }

        if held.is_empty() {
            continue;
        }
        let targets: Vec<Target> = held.iter().cloned().collect();
        if let Err(e) = store.touch_running(&targets, Utc::now()).await {
            error!(error = %e, held = targets.len(), "lease refresh failed, will retry next tick");
        }
    }

    debug!("lease renewer stopped");
}

fn apply(held: &mut HashSet<Target>, registration: Registration) {
    match registration {
        Registration::Add(target) => {
            held.insert(target);
        },
        Registration::Remove(target) => {
            held.remove(&target);
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use gantry_domain::{CancelInfo, EventId, EventRecord};
    use gantry_store::MemoryStore;

    fn running_record(target: &Target, now: DateTime<Utc>) -> EventRecord {
        EventRecord {
            id: EventId::Target(target.clone()),
            target: target.clone(),
            kind: "app.deploy".to_string(),
            owner: "alice".to_string(),
            start_time: now,
            end_time: None,
            lock_update_time: now,
            start_custom_data: None,
            end_custom_data: None,
            cancelable: false,
            running: true,
            error: String::new(),
            log: None,
            cancel_info: CancelInfo::default(),
        }
    }

    #[tokio::test]
    async fn test_added_target_gets_refreshed() {
        let store = Arc::new(MemoryStore::new());
        let target = Target::new("app", "a");
        let stale = Utc::now() - chrono::Duration::seconds(60);
        store.insert(&running_record(&target, stale)).await.unwrap();

        let renewer = RenewerHandle::spawn(store.clone(), Duration::from_millis(20));
        renewer.add(target.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        renewer.stop();

        let record = store
            .find_by_id(&EventId::Target(target))
            .await
            .unwrap()
            .unwrap();
        assert!(record.lock_update_time > stale);
    }

    #[tokio::test]
    async fn test_removed_target_stops_refreshing() {
        let store = Arc::new(MemoryStore::new());
        let target = Target::new("app", "a");
        store.insert(&running_record(&target, Utc::now())).await.unwrap();

        let renewer = RenewerHandle::spawn(store.clone(), Duration::from_millis(20));
        renewer.add(target.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;
        renewer.remove(target.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let frozen = store
            .find_by_id(&EventId::Target(target.clone()))
            .await
            .unwrap()
            .unwrap()
            .lock_update_time;
        tokio::time::sleep(Duration::from_millis(80)).await;
        renewer.stop();

        let after = store
            .find_by_id(&EventId::Target(target))
            .await
            .unwrap()
            .unwrap()
            .lock_update_time;
        assert_eq!(after, frozen);
    }

    #[tokio::test]
    async fn test_stop_halts_refreshing() {
        let store = Arc::new(MemoryStore::new());
        let target = Target::new("app", "a");
        store.insert(&running_record(&target, Utc::now())).await.unwrap();

        let renewer = RenewerHandle::spawn(store.clone(), Duration::from_millis(20));
        renewer.add(target.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;
        renewer.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let frozen = store
            .find_by_id(&EventId::Target(target.clone()))
            .await
            .unwrap()
            .unwrap()
            .lock_update_time;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let after = store
            .find_by_id(&EventId::Target(target))
            .await
            .unwrap()
            .unwrap()
            .lock_update_time;
        assert_eq!(after, frozen);
    }
}
