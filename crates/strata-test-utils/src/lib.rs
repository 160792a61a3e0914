//! Test helpers shared across Strata crates.

pub mod fixtures;
pub mod persistence;

pub use fixtures::{quiet_options, session_request};
pub use persistence::{FailingPersistence, Recorded, RecordingPersistence, SlowPersistence};
