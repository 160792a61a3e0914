//! Wiring of config, coordinator and session manager into one handle.

use crate::settings::{SessionSettings, coordinator_options_from_config};
use crate::sessions::SessionManager;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use strata_config::StrataConfig;
use strata_memory::{
    ContextCoordinator, CoordinatorHealth, InMemoryCoordinator, JsonlPersistence, MemoryError,
    PersistenceBackend, connect_coordinator,
};

/// Log file used when persistence is enabled without an explicit path.
pub const DEFAULT_PERSISTENCE_PATH: &str = ".strata/entries.jsonl";

/// A connected coordinator plus the session manager that writes through it.
pub struct Coordination {
    config: StrataConfig,
    coordinator: Arc<dyn ContextCoordinator>,
    sessions: Arc<SessionManager>,
}

impl Coordination {
    /// Connect the coordinator described by `config`. Never fails: an
    /// unusable persistence backend yields the degraded in-memory fallback.
    pub async fn connect(config: StrataConfig) -> Self {
        let options = coordinator_options_from_config(&config);
        let coordinator = if config.persistence.enabled {
            let path = config
                .persistence
                .path
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PERSISTENCE_PATH));
            match JsonlPersistence::new(&path) {
                Ok(backend) => {
                    let backend: Arc<dyn PersistenceBackend> = Arc::new(backend);
                    connect_coordinator(&options, Some(backend)).await
                }
                Err(err) => {
                    warn!(
                        "failed to create persistence log; using in-memory fallback (path={}, error={})",
                        path.display(),
                        err
                    );
                    let fallback: Arc<dyn ContextCoordinator> =
                        Arc::new(InMemoryCoordinator::fallback(
                            &options,
                            format!("jsonl backend unavailable: {err}"),
                        ));
                    fallback
                }
            }
        } else {
            connect_coordinator(&options, None).await
        };
        Self::with_coordinator(config, coordinator)
    }

    /// Build around an already connected coordinator.
    pub fn with_coordinator(
        config: StrataConfig,
        coordinator: Arc<dyn ContextCoordinator>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&coordinator),
            SessionSettings::from(&config.sessions),
        ));
        info!(
            "coordination ready (backend={}, degraded={})",
            coordinator.backend_name(),
            coordinator.degraded_reason().is_some()
        );
        Self {
            config,
            coordinator,
            sessions,
        }
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn coordinator(&self) -> Arc<dyn ContextCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    pub async fn health(&self) -> CoordinatorHealth {
        self.coordinator.health().await
    }

    /// Drain write-behind. Live sessions are left as they are; their last
    /// snapshot is what a later process resumes from.
    pub async fn shutdown(&self) -> Result<(), MemoryError> {
        self.coordinator.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::Coordination;
    use pretty_assertions::assert_eq;
    use strata_config::{PersistenceConfig, StrataConfig};
    use strata_memory::HealthStatus;

    #[tokio::test]
    async fn memory_only_config_is_healthy() {
        let coordination = Coordination::connect(StrataConfig::default()).await;
        let health = coordination.health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.backend, "memory");
    }

    #[tokio::test]
    async fn unwritable_log_path_falls_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "not a directory").expect("write");
        let config = StrataConfig::builder()
            .persistence(PersistenceConfig {
                enabled: true,
                path: Some(blocker.join("entries.jsonl").display().to_string()),
                ..PersistenceConfig::default()
            })
            .build();

        let coordination = Coordination::connect(config).await;
        let health = coordination.health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.backend, "memory-fallback");
    }
}
