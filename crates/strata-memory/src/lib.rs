//! Layered, scoped context store for Strata.
//!
//! The [`EntryStore`] holds context entries keyed by (layer, namespace, key),
//! and a [`ContextCoordinator`] wraps it with persistence, periodic sweeping
//! and health reporting.

pub mod coordinator;
pub mod error;
pub mod index;
pub mod layer;
pub mod model;
pub mod persistence;
pub mod scope;
pub mod store;
mod sweeper;

pub use coordinator::{
    ContextCoordinator, CoordinatorHealth, CoordinatorOptions, HealthStatus, InMemoryCoordinator,
    PersistentCoordinator, connect_coordinator,
};
pub use error::MemoryError;
pub use index::{SearchFilter, SearchHit, SearchQuery};
pub use layer::LayerPolicy;
pub use model::{
    ContextEntry, ContextScope, EntryKey, MemoryLayer, Priority, ScopeIds, StoreReceipt,
    StoreRequest,
};
pub use persistence::{JsonlPersistence, PersistenceBackend};
pub use scope::{Namespace, resolve, resolve_chain};
pub use store::{ChangeSink, EntryStore, StoreStats, SweepReport};
