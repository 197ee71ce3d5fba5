//! Gantry Event & Lock Data Model
//!
//! Pure data types for the event subsystem with zero I/O dependencies.
//! An event record doubles as the distributed lock row while it is
//! running and as an immutable audit entry once it has terminated.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod record;
pub mod target;

pub use record::{CancelInfo, EventRecord};
pub use target::{EventId, Target};
