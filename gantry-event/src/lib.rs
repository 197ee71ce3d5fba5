//! Gantry Event & Distributed Lock Subsystem
//!
//! Grants at most one running event per target across every control
//! plane process sharing a store, and turns each completed event into an
//! immutable audit record:
//! - Mutual exclusion rides on the store's insert-if-absent primitive;
//!   the running record is keyed by the target itself.
//! - A background worker keeps held leases fresh; a crashed holder's
//!   lock is reclaimed by the next acquirer once the lease expires.
//! - Cancellation is cooperative: requesters flag the record, holders
//!   acknowledge and terminate.
//!
//! # Usage
//!
//! ```rust,no_run
//! use gantry_event::{EventOpts, Events, LockConfig, Target};
//! use gantry_store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), gantry_event::EventError> {
//! let events = Events::new(Arc::new(MemoryStore::new()), LockConfig::default());
//!
//! let evt = events
//!     .new_event(EventOpts::new(Target::new("app", "my-app"), "app.deploy", "alice"))
//!     .await?;
//! evt.logf(format_args!("starting deploy"));
//! evt.done(None).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod handle;
mod history;
mod renewer;

pub use config::LockConfig;
pub use error::{EventError, Result};
pub use handle::Event;

// Re-export the data model for convenience
pub use gantry_domain::{CancelInfo, EventId, EventRecord, Target};

use chrono::Utc;
use gantry_store::EventStore;
use renewer::RenewerHandle;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, warn};

/// Options for starting a new event.
#[derive(Debug, Clone)]
pub struct EventOpts {
    /// Resource the event acts on
    pub target: Target,
    /// Operation class, e.g. `"app.deploy"`
    pub kind: String,
    /// Principal starting the operation
    pub owner: String,
    /// Whether the holder accepts cooperative cancellation
    pub cancelable: bool,
    /// Opaque payload recorded at start
    pub custom_data: Option<serde_json::Value>,
}

impl EventOpts {
    /// Create options with the mandatory fields.
    pub fn new(target: Target, kind: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            target,
            kind: kind.into(),
            owner: owner.into(),
            cancelable: false,
            custom_data: None,
        }
    }

    /// Allow cooperative cancellation of the event.
    pub fn cancelable(mut self) -> Self {
        self.cancelable = true;
        self
    }

    /// Attach an opaque payload to the start of the event.
    pub fn with_custom_data(mut self, data: serde_json::Value) -> Self {
        self.custom_data = Some(data);
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.target.is_valid() {
            return Err(EventError::MissingTarget);
        }
        if self.kind.is_empty() {
            return Err(EventError::MissingKind);
        }
        if self.owner.is_empty() {
            return Err(EventError::MissingOwner);
        }
        Ok(())
    }
}

/// The event subsystem handle.
///
/// One instance per process is the intended shape; embedders hosting
/// several independent tenants may run several instances, each with its
/// own renewer task.
pub struct Events {
    store: Arc<dyn EventStore>,
    config: LockConfig,
    renewer: OnceCell<RenewerHandle>,
}

impl Events {
    /// Create the subsystem over a store. The renewer worker is started
    /// lazily on the first successful acquisition.
    pub fn new(store: Arc<dyn EventStore>, config: LockConfig) -> Self {
        Self { store, config, renewer: OnceCell::new() }
    }

    /// Start a new event, acquiring the per-target lock.
    ///
    /// At most two insert attempts are made: when the first collides
    /// with a holder whose lease has expired, the stale event is
    /// terminated with an expiry error and the insert retried once.
    /// A live holder is reported as [`EventError::Locked`] carrying its
    /// record.
    pub async fn new_event(&self, opts: EventOpts) -> Result<Event> {
        opts.validate()?;
        let renewer = self.renewer().await.clone();

        let now = Utc::now();
        let data = EventRecord {
            id: EventId::Target(opts.target.clone()),
            target: opts.target,
            kind: opts.kind,
            owner: opts.owner,
            start_time: now,
            end_time: None,
            lock_update_time: now,
            start_custom_data: opts.custom_data,
            end_custom_data: None,
            cancelable: opts.cancelable,
            running: true,
            error: String::new(),
            log: None,
            cancel_info: CancelInfo::default(),
        };

        let mut reclaim_budget = 1;
        loop {
            match self.store.insert(&data).await {
                Ok(()) => {
                    // Register before returning: the target is never
                    // held but unregistered.
                    renewer.add(data.target.clone());
                    return Ok(Event::new(data, self.store.clone(), renewer));
                },
                Err(e) if e.is_duplicate() => {
                    if reclaim_budget > 0 {
                        reclaim_budget -= 1;
                        if self.reclaim_expired(&data.id).await? {
                            continue;
                        }
                    }
                    return match self.store.find_by_id(&data.id).await? {
                        Some(existing) => Err(EventError::Locked(Box::new(existing))),
                        // Holder vanished between the insert and the
                        // read; callers can simply retry.
                        None => Err(EventError::NotFound),
                    };
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// All events, history and running, newest first.
    pub async fn all(&self) -> Result<Vec<EventRecord>> {
        Ok(self.store.list_all().await?)
    }

    /// Stop the renewer worker if it was started. Teardown affordance;
    /// in production the worker runs for the process lifetime.
    pub fn shutdown(&self) {
        if let Some(renewer) = self.renewer.get() {
            renewer.stop();
        }
    }

    async fn renewer(&self) -> &RenewerHandle {
        self.renewer
            .get_or_init(|| async {
                RenewerHandle::spawn(self.store.clone(), self.config.renew_interval)
            })
            .await
    }

    /// Terminate the holder of `id` when its lease has expired. Returns
    /// whether the slot may be free and the insert worth retrying.
    async fn reclaim_expired(&self, id: &EventId) -> Result<bool> {
        let Some(existing) = self.store.find_by_id(id).await? else {
            // Holder finished between our insert and this read.
            return Ok(true);
        };

        let now = Utc::now();
        if !existing.lease_expired(self.config.expire_timeout_chrono(), now) {
            return Ok(false);
        }

        let age = existing.lease_age(now);
        warn!(event = %existing, age_secs = age.num_seconds(), "reclaiming expired event lock");
        let message = format!("event expired, no update for {}s", age.num_seconds());
        let renewer = self.renewer().await;
        if let Err(e) = history::finish(
            self.store.as_ref(),
            renewer,
            existing,
            String::new(),
            Some(&message),
            None,
            false,
        )
        .await
        {
            // Whatever went wrong, the retried insert will surface the
            // live state of the slot.
            error!(error = %e, "failed to terminate expired event");
        }
        Ok(true)
    }
}
