//! Session and handoff coordination for Strata.
//!
//! This crate owns the session manager, the handoff coordinator, and the
//! runtime handle that connects both to a context coordinator.

mod archive;
pub mod error;
mod handoff;
mod runtime;
pub mod sessions;
mod settings;
pub mod types;

pub use archive::{ARCHIVE_FLAG, ArchiveOutcome};
pub use error::CoordinationError;
/// Handoff coordination lives on [`SessionManager`].
pub use handoff::UNASSIGNED_AGENT;
pub use runtime::{Coordination, DEFAULT_PERSISTENCE_PATH};
pub use sessions::SessionManager;
pub use settings::{SessionSettings, coordinator_options_from_config, layer_policy_from_config};
pub use types::*;
