//! Storage layer for the Gantry event subsystem.
//!
//! Defines the [`EventStore`] port over a single logical collection of
//! event records, an in-memory implementation for tests and development,
//! and a PostgreSQL implementation behind the `postgres` feature.

pub mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::{migrate, PgEventStore};
pub use store::EventStore;
