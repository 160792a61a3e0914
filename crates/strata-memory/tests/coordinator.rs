//! Coordinator selection, write-behind, and restart behavior.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_memory::{
    ContextCoordinator, ContextScope, HealthStatus, JsonlPersistence, MemoryLayer,
    PersistenceBackend, ScopeIds, SearchQuery, StoreRequest, connect_coordinator,
};
use strata_test_utils::{
    FailingPersistence, Recorded, RecordingPersistence, SlowPersistence, quiet_options,
    session_request,
};
use tempfile::tempdir;

#[tokio::test]
async fn stalled_backend_selects_fallback_within_timeout() {
    let options = quiet_options();
    let backend: Arc<dyn PersistenceBackend> =
        Arc::new(SlowPersistence::new(Duration::from_secs(30)));

    let started = Instant::now();
    let coordinator = connect_coordinator(&options, Some(backend)).await;
    assert!(started.elapsed() < Duration::from_secs(5));

    let health = coordinator.health().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.backend, "memory-fallback");
    assert!(health.reason.unwrap_or_default().contains("timed out"));

    coordinator
        .store(session_request("deploy-status", json!({"state": "green"}), "s1"))
        .await
        .expect("fallback store");
    let entry = coordinator
        .retrieve("deploy-status", ContextScope::Session, &ScopeIds::session("s1"))
        .await
        .expect("fallback retrieve");
    assert_eq!(entry.value, json!({"state": "green"}));
}

#[cfg(unix)]
#[tokio::test]
async fn blocked_log_file_selects_fallback_within_timeout() {
    let temp = tempdir().expect("tmp");
    let path = temp.path().join("entries.jsonl");
    let status = std::process::Command::new("mkfifo")
        .arg(&path)
        .status()
        .expect("mkfifo");
    assert!(status.success());
    let backend: Arc<dyn PersistenceBackend> =
        Arc::new(JsonlPersistence::new(&path).expect("open"));

    let started = Instant::now();
    let coordinator = connect_coordinator(&quiet_options(), Some(backend)).await;
    assert!(started.elapsed() < Duration::from_secs(5));

    let health = coordinator.health().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.backend, "memory-fallback");
    assert!(health.reason.unwrap_or_default().contains("timed out"));

    // Hand the stuck reader an EOF so the blocking pool can shut down.
    drop(
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("open writer"),
    );
}

#[tokio::test]
async fn failed_load_selects_fallback() {
    let backend: Arc<dyn PersistenceBackend> = Arc::new(FailingPersistence::on_load());
    let coordinator = connect_coordinator(&quiet_options(), Some(backend)).await;
    let health = coordinator.health().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert!(health.reason.unwrap_or_default().contains("connection refused"));
}

#[tokio::test]
async fn failing_writes_degrade_without_failing_callers() {
    let backend: Arc<dyn PersistenceBackend> = Arc::new(FailingPersistence::on_write());
    let coordinator = connect_coordinator(&quiet_options(), Some(backend)).await;
    assert_eq!(coordinator.health().await.status, HealthStatus::Healthy);

    let receipt = coordinator
        .store(session_request("k", json!(1), "s1"))
        .await
        .expect("foreground write succeeds");
    assert_eq!(receipt.sync_version, 1);
    coordinator.shutdown().await.expect("drain");

    let health = coordinator.health().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.backend, "failing");
    assert_eq!(health.stats.total_entries, 1);
}

#[tokio::test]
async fn mutations_reach_backend_in_order() {
    let recording = RecordingPersistence::new();
    let backend: Arc<dyn PersistenceBackend> = Arc::new(recording.clone());
    let coordinator = connect_coordinator(&quiet_options(), Some(backend)).await;

    coordinator
        .store(session_request("k", json!(1), "s1"))
        .await
        .expect("v1");
    coordinator
        .store(session_request("k", json!(2), "s1"))
        .await
        .expect("v2");
    coordinator
        .delete("k", ContextScope::Session, &ScopeIds::session("s1"), None)
        .await
        .expect("delete");
    coordinator.shutdown().await.expect("drain");

    assert_eq!(
        recording.calls(),
        vec![
            Recorded::Upsert {
                key: "k".to_string(),
                version: 1
            },
            Recorded::Upsert {
                key: "k".to_string(),
                version: 2
            },
            Recorded::Remove {
                key: "k".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn jsonl_state_survives_restart() {
    let temp = tempdir().expect("tmp");
    let path = temp.path().join("entries.jsonl");

    {
        let backend: Arc<dyn PersistenceBackend> =
            Arc::new(JsonlPersistence::new(&path).expect("open"));
        let coordinator = connect_coordinator(&quiet_options(), Some(backend)).await;
        assert_eq!(coordinator.backend_name(), "jsonl");
        coordinator
            .store(
                StoreRequest::new(
                    "runbook",
                    json!({"steps": 3}),
                    MemoryLayer::LongTerm,
                    ContextScope::Tenant,
                )
                .with_ids(ScopeIds::tenant("acme"))
                .with_category("ops"),
            )
            .await
            .expect("store");
        coordinator
            .store(StoreRequest::new(
                "scratch",
                json!(1),
                MemoryLayer::Ephemeral,
                ContextScope::Global,
            ))
            .await
            .expect("store");
        coordinator
            .delete("scratch", ContextScope::Global, &ScopeIds::default(), None)
            .await
            .expect("delete");
        coordinator.shutdown().await.expect("drain");
    }

    let backend: Arc<dyn PersistenceBackend> =
        Arc::new(JsonlPersistence::new(&path).expect("reopen"));
    let coordinator = connect_coordinator(&quiet_options(), Some(backend)).await;
    let entry = coordinator
        .retrieve("runbook", ContextScope::Tenant, &ScopeIds::tenant("acme"))
        .await
        .expect("restored");
    assert_eq!(entry.value, json!({"steps": 3}));
    assert_eq!(entry.sync_version, 1);

    let hits = coordinator
        .search(&SearchQuery::new("").with_category("ops"))
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert!(
        coordinator
            .retrieve("scratch", ContextScope::Global, &ScopeIds::default())
            .await
            .expect_err("deleted before restart")
            .is_not_found()
    );
}

#[tokio::test]
async fn preloaded_entries_are_not_written_back() {
    let seed = connect_coordinator(&quiet_options(), None).await;
    seed.store(session_request("k", json!(1), "s1"))
        .await
        .expect("seed");
    let entries = seed
        .list_namespace(ContextScope::Session, &ScopeIds::session("s1"), &[])
        .await
        .expect("list");

    let recording = RecordingPersistence::with_entries(entries);
    let backend: Arc<dyn PersistenceBackend> = Arc::new(recording.clone());
    let coordinator = connect_coordinator(&quiet_options(), Some(backend)).await;
    coordinator.shutdown().await.expect("drain");

    assert!(recording.calls().is_empty());
    assert_eq!(coordinator.stats().await.total_entries, 1);
}
