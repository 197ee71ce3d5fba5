//! Event subsystem errors.

use gantry_domain::EventRecord;
use gantry_store::StoreError;
use thiserror::Error;

/// Errors surfaced to callers of the event subsystem.
#[derive(Debug, Error)]
pub enum EventError {
    /// Options carried no usable target
    #[error("event target is mandatory")]
    MissingTarget,

    /// Options carried no kind
    #[error("event kind is mandatory")]
    MissingKind,

    /// Options carried no owner
    #[error("event owner is mandatory")]
    MissingOwner,

    /// A live event already holds the target; carries the holder for
    /// diagnostics
    #[error("event locked: {0}")]
    Locked(Box<EventRecord>),

    /// The event is gone from the active set
    #[error("event not found")]
    NotFound,

    /// The record forbids cooperative cancellation
    #[error("event is not cancelable")]
    NotCancelable,

    /// Invalid lock timing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Backing store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for event subsystem operations.
pub type Result<T> = std::result::Result<T, EventError>;
