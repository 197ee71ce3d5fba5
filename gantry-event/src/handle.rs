//! Per-event lock handle.
//!
//! The handle wraps the running record together with an in-memory log
//! buffer and an optional external log sink. Mutating operations update
//! the store atomically and refresh the local snapshot from the row the
//! store returns.

use crate::error::{EventError, Result};
use crate::history;
use crate::renewer::RenewerHandle;
use chrono::Utc;
use gantry_domain::{CancelInfo, EventRecord};
use gantry_store::EventStore;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

/// A held per-target lock and its accumulating audit state.
///
/// Obtained from [`Events::new_event`](crate::Events::new_event); must be
/// terminated with [`done`](Event::done) or [`abort`](Event::abort).
pub struct Event {
    data: EventRecord,
    log_buffer: Mutex<String>,
    log_writer: Mutex<Option<Box<dyn Write + Send>>>,
    store: Arc<dyn EventStore>,
    renewer: RenewerHandle,
}

impl Event {
    pub(crate) fn new(
        data: EventRecord,
        store: Arc<dyn EventStore>,
        renewer: RenewerHandle,
    ) -> Self {
        Self {
            data,
            log_buffer: Mutex::new(String::new()),
            log_writer: Mutex::new(None),
            store,
            renewer,
        }
    }

    /// The persisted record as last seen by this handle.
    pub fn record(&self) -> &EventRecord {
        &self.data
    }

    /// Append one formatted line to the event log.
    ///
    /// The line always lands in the in-memory buffer, which is
    /// snapshotted into the historical record at termination. When an
    /// external sink is set the line is also written there; sink
    /// failures are swallowed. Call as
    /// `evt.logf(format_args!("pulling image {}", image))`.
    pub fn logf(&self, args: fmt::Arguments<'_>) {
        debug!(
            target_name = %self.data.target.name,
            target_value = %self.data.target.value,
            kind = %self.data.kind,
            "{}", args,
        );
        let line = format!("{}\n", args);
        if let Some(writer) = self.log_writer.lock().unwrap().as_mut() {
            let _ = writer.write_all(line.as_bytes());
        }
        self.log_buffer.lock().unwrap().push_str(&line);
    }

    /// Install or replace the external log sink.
    ///
    /// The sink must tolerate interleaved writes from concurrent
    /// [`logf`](Event::logf) callers.
    pub fn set_log_writer(&self, writer: Box<dyn Write + Send>) {
        *self.log_writer.lock().unwrap() = Some(writer);
    }

    /// Request cooperative cancellation of this event.
    ///
    /// Marks the running record as asked-to-cancel; the holder decides
    /// when to acknowledge. Fails with [`EventError::NotCancelable`] when
    /// the record forbids it and [`EventError::NotFound`] when the
    /// running record is already gone.
    pub async fn try_cancel(&mut self, reason: &str, owner: &str) -> Result<()> {
        if !self.data.cancelable || !self.data.running {
            return Err(EventError::NotCancelable);
        }
        let info = CancelInfo {
            owner: owner.to_string(),
            reason: reason.to_string(),
            start_time: Some(Utc::now()),
            ack_time: None,
            asked: true,
            canceled: false,
        };
        match self.store.request_cancel(&self.data.id, info).await? {
            Some(updated) => {
                self.data = updated;
                Ok(())
            },
            None => Err(EventError::NotFound),
        }
    }

    /// Acknowledge a pending cancellation request.
    ///
    /// Only matches a record whose cancellation was asked; the absence of
    /// a request reports [`EventError::NotFound`] like a vanished record.
    pub async fn ack_cancel(&mut self) -> Result<()> {
        if !self.data.cancelable || !self.data.running {
            return Err(EventError::NotCancelable);
        }
        match self.store.ack_cancel(&self.data.id, Utc::now()).await? {
            Some(updated) => {
                self.data = updated;
                Ok(())
            },
            None => Err(EventError::NotFound),
        }
    }

    /// Terminate the event, recording the outcome in the audit history.
    ///
    /// `err` is the terminal error message, if the operation failed.
    /// Failures of the termination itself are logged here as well as
    /// returned, since `done` usually runs in cleanup paths that drop the
    /// result.
    pub async fn done(self, err: Option<&str>) -> Result<()> {
        self.finish(err, None).await
    }

    /// Like [`done`](Event::done), attaching an opaque payload to the
    /// historical record.
    pub async fn done_with_data(self, err: Option<&str>, data: serde_json::Value) -> Result<()> {
        self.finish(err, Some(data)).await
    }

    /// Discard the event without leaving any historical trace.
    ///
    /// Used for speculative reservations that never amounted to an
    /// operation worth auditing.
    pub async fn abort(self) -> Result<()> {
        let (data, _, store, renewer) = self.into_parts();
        history::finish(store.as_ref(), &renewer, data, String::new(), None, None, true).await
    }

    async fn finish(self, err: Option<&str>, custom_data: Option<serde_json::Value>) -> Result<()> {
        let descriptor = self.data.to_string();
        let (data, log, store, renewer) = self.into_parts();
        let result =
            history::finish(store.as_ref(), &renewer, data, log, err, custom_data, false).await;
        if let Err(e) = &result {
            error!(event = %descriptor, error = %e, "error marking event as done");
        }
        result
    }

    fn into_parts(self) -> (EventRecord, String, Arc<dyn EventStore>, RenewerHandle) {
        let log = self.log_buffer.into_inner().unwrap_or_else(|e| e.into_inner());
        (self.data, log, self.store, self.renewer)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("data", &self.data).finish_non_exhaustive()
    }
}
