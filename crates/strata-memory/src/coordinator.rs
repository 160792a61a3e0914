//! Coordinator capability over the entry store, with a persistent primary
//! and an in-memory fallback selected at startup.

use crate::error::MemoryError;
use crate::index::{SearchHit, SearchQuery};
use crate::layer::LayerPolicy;
use crate::model::{ContextEntry, ContextScope, MemoryLayer, ScopeIds, StoreReceipt, StoreRequest};
use crate::persistence::{HealthFlag, PersistenceBackend, WriteBehind};
use crate::store::{EntryStore, StoreStats, SweepReport};
use crate::sweeper::{SweeperHandle, spawn_sweeper};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Construction options shared by both coordinator implementations.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorOptions {
    pub layer_policy: LayerPolicy,
    pub max_entries: Option<usize>,
    /// `None` disables the background sweeper; lazy expiry still applies.
    pub sweep_interval: Option<Duration>,
    /// Upper bound on opening the persistent coordinator.
    pub init_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            layer_policy: LayerPolicy::default(),
            max_entries: None,
            sweep_interval: Some(Duration::from_secs(60)),
            init_timeout: Duration::from_millis(5_000),
            queue_capacity: 1_024,
        }
    }
}

impl CoordinatorOptions {
    fn build_store(&self) -> EntryStore {
        EntryStore::new(self.layer_policy).with_max_entries(self.max_entries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Health report returned by [`ContextCoordinator::health`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorHealth {
    pub status: HealthStatus,
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub stats: StoreStats,
    pub timestamp: DateTime<Utc>,
}

/// The single capability every consumer of context memory depends on.
#[async_trait]
pub trait ContextCoordinator: Send + Sync {
    /// Underlying store; all default operations delegate to it.
    fn entries(&self) -> &EntryStore;

    fn backend_name(&self) -> &str;

    /// Why the coordinator is degraded, if it is.
    fn degraded_reason(&self) -> Option<String>;

    async fn store(&self, request: StoreRequest) -> Result<StoreReceipt, MemoryError> {
        self.entries().store(request)
    }

    async fn retrieve(
        &self,
        key: &str,
        scope: ContextScope,
        ids: &ScopeIds,
    ) -> Result<ContextEntry, MemoryError> {
        self.entries().retrieve(key, scope, ids)
    }

    async fn retrieve_first(
        &self,
        key: &str,
        scopes: &[ContextScope],
        ids: &ScopeIds,
    ) -> Result<ContextEntry, MemoryError> {
        self.entries().retrieve_first(key, scopes, ids)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, MemoryError> {
        Ok(self.entries().search(query))
    }

    async fn delete(
        &self,
        key: &str,
        scope: ContextScope,
        ids: &ScopeIds,
        layer: Option<MemoryLayer>,
    ) -> Result<usize, MemoryError> {
        self.entries().delete(key, scope, ids, layer)
    }

    async fn list_namespace(
        &self,
        scope: ContextScope,
        ids: &ScopeIds,
        layers: &[MemoryLayer],
    ) -> Result<Vec<ContextEntry>, MemoryError> {
        self.entries().list_namespace(scope, ids, layers)
    }

    async fn sweep(&self) -> SweepReport {
        self.entries().sweep(Utc::now())
    }

    async fn stats(&self) -> StoreStats {
        self.entries().stats()
    }

    async fn health(&self) -> CoordinatorHealth {
        let reason = self.degraded_reason();
        CoordinatorHealth {
            status: if reason.is_some() {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            backend: self.backend_name().to_string(),
            reason,
            stats: self.entries().stats(),
            timestamp: Utc::now(),
        }
    }

    /// Drain pending background work. The coordinator stays usable.
    async fn shutdown(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}

/// Non-persistent coordinator. Healthy when chosen on purpose, degraded when
/// it stands in for a primary that failed to start.
pub struct InMemoryCoordinator {
    store: Arc<EntryStore>,
    backend: &'static str,
    health: HealthFlag,
    _sweeper: Option<SweeperHandle>,
}

impl InMemoryCoordinator {
    pub fn new(options: &CoordinatorOptions) -> Self {
        Self::with_health(options, "memory", HealthFlag::default())
    }

    /// Stand-in used when the primary coordinator could not be opened.
    pub fn fallback(options: &CoordinatorOptions, reason: impl Into<String>) -> Self {
        Self::with_health(options, "memory-fallback", HealthFlag::degraded(reason))
    }

    fn with_health(
        options: &CoordinatorOptions,
        backend: &'static str,
        health: HealthFlag,
    ) -> Self {
        let store = Arc::new(options.build_store());
        let sweeper = options
            .sweep_interval
            .and_then(|every| spawn_sweeper(&store, every));
        Self {
            store,
            backend,
            health,
            _sweeper: sweeper,
        }
    }
}

#[async_trait]
impl ContextCoordinator for InMemoryCoordinator {
    fn entries(&self) -> &EntryStore {
        &self.store
    }

    fn backend_name(&self) -> &str {
        self.backend
    }

    fn degraded_reason(&self) -> Option<String> {
        self.health.reason()
    }
}

/// Coordinator whose mutations are mirrored into a persistence backend
/// through a bounded write-behind queue.
pub struct PersistentCoordinator {
    store: Arc<EntryStore>,
    backend: String,
    health: Arc<HealthFlag>,
    write_behind: Arc<WriteBehind>,
    _worker: JoinHandle<()>,
    _sweeper: Option<SweeperHandle>,
}

impl PersistentCoordinator {
    /// Load the backend's entries and start the background tasks.
    pub async fn open(
        options: &CoordinatorOptions,
        backend: Arc<dyn PersistenceBackend>,
    ) -> Result<Self, MemoryError> {
        let entries = backend.load().await?;
        let health = Arc::new(HealthFlag::default());
        let (write_behind, worker) =
            WriteBehind::spawn(Arc::clone(&backend), options.queue_capacity, Arc::clone(&health));
        let write_behind = Arc::new(write_behind);
        let store = Arc::new(options.build_store().with_sink(write_behind.clone()));
        let loaded = store.hydrate(entries);
        let sweeper = options
            .sweep_interval
            .and_then(|every| spawn_sweeper(&store, every));
        info!(
            "opened persistent coordinator (backend={}, entries={})",
            backend.name(),
            loaded
        );
        Ok(Self {
            store,
            backend: backend.name().to_string(),
            health,
            write_behind,
            _worker: worker,
            _sweeper: sweeper,
        })
    }
}

#[async_trait]
impl ContextCoordinator for PersistentCoordinator {
    fn entries(&self) -> &EntryStore {
        &self.store
    }

    fn backend_name(&self) -> &str {
        &self.backend
    }

    fn degraded_reason(&self) -> Option<String> {
        self.health.reason()
    }

    async fn shutdown(&self) -> Result<(), MemoryError> {
        if let Err(err) = self.write_behind.flush().await {
            self.health.degrade(err.to_string());
            return Err(err);
        }
        info!("drained write-behind queue (backend={})", self.backend);
        Ok(())
    }
}

/// Open the persistent coordinator within `init_timeout`, falling back to a
/// degraded in-memory coordinator on timeout or error. Without a backend the
/// in-memory coordinator is used directly and reports healthy.
pub async fn connect_coordinator(
    options: &CoordinatorOptions,
    backend: Option<Arc<dyn PersistenceBackend>>,
) -> Arc<dyn ContextCoordinator> {
    let Some(backend) = backend else {
        info!("using in-memory coordinator (persistence disabled)");
        return Arc::new(InMemoryCoordinator::new(options));
    };
    let name = backend.name().to_string();
    match tokio::time::timeout(options.init_timeout, PersistentCoordinator::open(options, backend))
        .await
    {
        Ok(Ok(coordinator)) => Arc::new(coordinator),
        Ok(Err(err)) => {
            warn!(
                "persistent coordinator failed to open; using in-memory fallback (backend={}, error={})",
                name, err
            );
            Arc::new(InMemoryCoordinator::fallback(
                options,
                format!("{name} backend unavailable: {err}"),
            ))
        }
        Err(_) => {
            warn!(
                "persistent coordinator timed out; using in-memory fallback (backend={}, timeout_ms={})",
                name,
                options.init_timeout.as_millis()
            );
            Arc::new(InMemoryCoordinator::fallback(
                options,
                format!(
                    "{name} backend initialization timed out after {}ms",
                    options.init_timeout.as_millis()
                ),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ContextCoordinator, CoordinatorOptions, HealthStatus, InMemoryCoordinator,
        connect_coordinator,
    };
    use crate::model::{ContextScope, MemoryLayer, ScopeIds, StoreRequest};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_without_backend_is_healthy() {
        let coordinator = connect_coordinator(&CoordinatorOptions::default(), None).await;
        coordinator
            .store(StoreRequest::new(
                "k",
                json!(1),
                MemoryLayer::Session,
                ContextScope::Global,
            ))
            .await
            .expect("store");
        let health = coordinator.health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.backend, "memory");
        assert_eq!(health.stats.total_entries, 1);
    }

    #[tokio::test]
    async fn fallback_reports_reason() {
        let coordinator = InMemoryCoordinator::fallback(&CoordinatorOptions::default(), "boom");
        let health = coordinator.health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.reason.as_deref(), Some("boom"));

        let entry = coordinator
            .store(
                StoreRequest::new("k", json!(1), MemoryLayer::Session, ContextScope::User)
                    .with_ids(ScopeIds::user("u1")),
            )
            .await
            .expect("fallback still serves writes");
        assert_eq!(entry.sync_version, 1);
    }
}
