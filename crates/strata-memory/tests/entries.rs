//! End-to-end behavior of the store through the coordinator interface.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use strata_memory::{
    ContextCoordinator, ContextScope, InMemoryCoordinator, MemoryLayer, Priority, ScopeIds,
    SearchQuery, StoreRequest,
};
use strata_test_utils::{quiet_options, session_request};

fn coordinator() -> Arc<dyn ContextCoordinator> {
    Arc::new(InMemoryCoordinator::new(&quiet_options()))
}

#[tokio::test]
async fn stored_values_round_trip_before_expiry() {
    let coordinator = coordinator();
    let cases = [
        (MemoryLayer::Ephemeral, ContextScope::Agent, ScopeIds::agent("agent-A")),
        (MemoryLayer::ShortTerm, ContextScope::User, ScopeIds::user("u1")),
        (MemoryLayer::Permanent, ContextScope::Global, ScopeIds::default()),
    ];
    for (layer, scope, ids) in cases {
        let value = json!({"layer": layer.as_str()});
        let receipt = coordinator
            .store(
                StoreRequest::new("fact", value.clone(), layer, scope)
                    .with_ids(ids.clone())
                    .with_metadata(json!({"origin": "test", "tags": ["a"]})),
            )
            .await
            .expect("store");
        assert_eq!(receipt.sync_version, 1);
        assert_eq!(receipt.layer, layer);
        assert_eq!(receipt.scope, scope);

        let entry = coordinator
            .retrieve("fact", scope, &ids)
            .await
            .expect("retrieve");
        assert_eq!(entry.value, value);
        assert_eq!(entry.layer, layer);
        assert_eq!(entry.scope, scope);
        assert_eq!(entry.metadata, json!({"origin": "test", "tags": ["a"]}));
        assert_eq!(entry.entry_id, receipt.entry_id);
    }
}

#[tokio::test]
async fn user_lookup_never_falls_back_to_global() {
    let coordinator = coordinator();
    coordinator
        .store(StoreRequest::new(
            "theme",
            json!("dark"),
            MemoryLayer::LongTerm,
            ContextScope::Global,
        ))
        .await
        .expect("global");
    let ids = ScopeIds::user("u1");

    let err = coordinator
        .retrieve("theme", ContextScope::User, &ids)
        .await
        .expect_err("no implicit fallback");
    assert!(err.is_not_found());

    let entry = coordinator
        .retrieve_first("theme", &[ContextScope::User, ContextScope::Global], &ids)
        .await
        .expect("explicit chain");
    assert_eq!(entry.value, json!("dark"));
}

#[tokio::test]
async fn expired_entries_disappear_from_every_read_path() {
    let coordinator = coordinator();
    coordinator
        .store(session_request("flash", json!("now you see me"), "s1").expires_in(0))
        .await
        .expect("store");

    assert!(
        coordinator
            .search(&SearchQuery::new("flash"))
            .await
            .expect("search")
            .is_empty()
    );
    assert!(
        coordinator
            .list_namespace(ContextScope::Session, &ScopeIds::session("s1"), &[])
            .await
            .expect("list")
            .is_empty()
    );
    assert!(
        coordinator
            .retrieve("flash", ContextScope::Session, &ScopeIds::session("s1"))
            .await
            .expect_err("expired")
            .is_not_found()
    );
}

#[tokio::test]
async fn stats_track_counts_and_hit_rate() {
    let coordinator = coordinator();
    coordinator
        .store(session_request("a", json!(1), "s1").with_priority(Priority::High))
        .await
        .expect("a");
    coordinator
        .store(StoreRequest::new(
            "b",
            json!(2),
            MemoryLayer::Permanent,
            ContextScope::Global,
        ))
        .await
        .expect("b");
    coordinator
        .retrieve("a", ContextScope::Session, &ScopeIds::session("s1"))
        .await
        .expect("hit");
    let _ = coordinator
        .retrieve("missing", ContextScope::Global, &ScopeIds::default())
        .await;

    let stats = coordinator.stats().await;
    assert_eq!(stats.total_entries, 2);
    assert_eq!(stats.entries_by_layer[&MemoryLayer::Session], 1);
    assert_eq!(stats.entries_by_layer[&MemoryLayer::Permanent], 1);
    assert_eq!(stats.entries_by_scope[&ContextScope::Session], 1);
    assert_eq!(stats.writes, 2);
    assert_eq!(stats.reads, 2);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn concurrent_tasks_each_observe_a_distinct_version() {
    let coordinator = coordinator();
    let mut tasks = Vec::new();
    for worker in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        tasks.push(tokio::spawn(async move {
            let mut versions = Vec::new();
            for n in 0..25 {
                let receipt = coordinator
                    .store(session_request("shared", json!([worker, n]), "s1"))
                    .await
                    .expect("store");
                versions.push(receipt.sync_version);
            }
            versions
        }));
    }
    let mut versions = Vec::new();
    for task in tasks {
        versions.extend(task.await.expect("join"));
    }
    versions.sort_unstable();
    let expected: Vec<u64> = (1..=200).collect();
    assert_eq!(versions, expected);
}
