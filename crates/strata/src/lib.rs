//! Public SDK surface for Strata.
//!
//! This crate re-exports the config, memory and coordination crates and
//! provides a small initialization helper to keep consumer setup consistent.

/// Re-export for convenience.
pub use strata_config as config;
/// Re-export for convenience.
pub use strata_core as core;
/// Re-export for convenience.
pub use strata_memory as memory;

pub use strata_core::{Coordination, CoordinationError, SessionManager};
pub use strata_memory::{ContextCoordinator, MemoryError};

#[inline]
/// Initialize logging using env_logger if the "logging" feature is enabled.
///
/// This is a no-op if the feature is not enabled.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        let _ = env_logger::try_init();
    }
}
