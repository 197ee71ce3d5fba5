//! Test helpers for Gantry event-subsystem tests.
//!
//! Provides seeding helpers for running and historical records, and an
//! audit-trail checker for asserting that an operation left exactly one
//! matching historical event.

mod helpers;

pub use helpers::{has_event, seed_historical_event, seed_running_event, EventDesc};
