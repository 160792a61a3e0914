//! End-of-session treatment of a session's short-lived entries.

use crate::error::CoordinationError;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strata_config::ArchivePolicy;
use strata_memory::{
    ContextCoordinator, ContextEntry, ContextScope, MemoryLayer, ScopeIds, StoreRequest,
};

/// Layers a session's working entries live in.
const WORKING_LAYERS: [MemoryLayer; 2] = [MemoryLayer::Ephemeral, MemoryLayer::Session];

/// Layer promoted entries move to.
const ARCHIVE_LAYER: MemoryLayer = MemoryLayer::ShortTerm;

/// Metadata flag checked by [`ArchivePolicy::PromoteMarked`].
pub const ARCHIVE_FLAG: &str = "archive";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveOutcome {
    pub promoted: Vec<String>,
    pub dropped: Vec<String>,
}

fn should_promote(policy: ArchivePolicy, entry: &ContextEntry) -> bool {
    match policy {
        ArchivePolicy::PromoteAll => true,
        ArchivePolicy::DropAll => false,
        ArchivePolicy::PromoteMarked => entry
            .metadata
            .get(ARCHIVE_FLAG)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
    }
}

/// Promote or drop every ephemeral/session entry in the session namespace.
///
/// Keys for which `is_internal` returns true are always dropped.
pub(crate) async fn apply_archive_policy(
    coordinator: &dyn ContextCoordinator,
    policy: ArchivePolicy,
    ids: &ScopeIds,
    is_internal: impl Fn(&str) -> bool,
) -> Result<ArchiveOutcome, CoordinationError> {
    let entries = coordinator
        .list_namespace(ContextScope::Session, ids, &WORKING_LAYERS)
        .await?;
    let mut outcome = ArchiveOutcome::default();
    for entry in entries {
        if !is_internal(&entry.key) && should_promote(policy, &entry) {
            coordinator
                .store(StoreRequest::from_entry(&entry, ARCHIVE_LAYER))
                .await?;
            debug!(
                "promoted session entry (session_id={}, key={}, from={}, to={})",
                ids.session_id.as_deref().unwrap_or_default(),
                entry.key,
                entry.layer,
                ARCHIVE_LAYER
            );
            outcome.promoted.push(entry.key.clone());
        } else {
            outcome.dropped.push(entry.key.clone());
        }
        match coordinator
            .delete(&entry.key, ContextScope::Session, ids, Some(entry.layer))
            .await
        {
            Ok(_) => {}
            // Expired between listing and deletion.
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!(
                    "failed to remove session entry (session_id={}, key={}, layer={}, error={})",
                    ids.session_id.as_deref().unwrap_or_default(),
                    entry.key,
                    entry.layer,
                    err
                );
                return Err(err.into());
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::apply_archive_policy;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use strata_config::ArchivePolicy;
    use strata_memory::{
        ContextCoordinator, ContextScope, CoordinatorOptions, InMemoryCoordinator, MemoryLayer,
        ScopeIds, StoreRequest,
    };

    async fn seeded() -> InMemoryCoordinator {
        let coordinator = InMemoryCoordinator::new(&CoordinatorOptions {
            sweep_interval: None,
            ..CoordinatorOptions::default()
        });
        let ids = ScopeIds::session("s1");
        let put = |key: &str, layer: MemoryLayer, archive: bool| {
            StoreRequest::new(key, json!(key), layer, ContextScope::Session)
                .with_ids(ids.clone())
                .with_metadata(json!({"archive": archive}))
        };
        for request in [
            put("marked", MemoryLayer::Session, true),
            put("scratch", MemoryLayer::Ephemeral, false),
            put("session:state", MemoryLayer::Session, true),
            put("kept", MemoryLayer::LongTerm, false),
        ] {
            coordinator.store(request).await.expect("store");
        }
        coordinator
    }

    fn internal(key: &str) -> bool {
        key.starts_with("session:")
    }

    #[tokio::test]
    async fn promote_marked_moves_flagged_entries_only() {
        let coordinator = seeded().await;
        let ids = ScopeIds::session("s1");
        let outcome =
            apply_archive_policy(&coordinator, ArchivePolicy::PromoteMarked, &ids, internal)
                .await
                .expect("archive");
        assert_eq!(outcome.promoted, vec!["marked"]);
        let mut dropped = outcome.dropped.clone();
        dropped.sort();
        assert_eq!(dropped, vec!["scratch", "session:state"]);

        let promoted = coordinator
            .retrieve("marked", ContextScope::Session, &ids)
            .await
            .expect("promoted");
        assert_eq!(promoted.layer, MemoryLayer::ShortTerm);
        assert!(
            coordinator
                .retrieve("scratch", ContextScope::Session, &ids)
                .await
                .is_err()
        );
        let untouched = coordinator
            .retrieve("kept", ContextScope::Session, &ids)
            .await
            .expect("long term untouched");
        assert_eq!(untouched.layer, MemoryLayer::LongTerm);
    }

    #[tokio::test]
    async fn drop_all_and_promote_all() {
        let ids = ScopeIds::session("s1");

        let coordinator = seeded().await;
        let outcome = apply_archive_policy(&coordinator, ArchivePolicy::DropAll, &ids, internal)
            .await
            .expect("drop");
        assert!(outcome.promoted.is_empty());
        assert_eq!(outcome.dropped.len(), 3);

        let coordinator = seeded().await;
        let outcome = apply_archive_policy(&coordinator, ArchivePolicy::PromoteAll, &ids, internal)
            .await
            .expect("promote");
        let mut promoted = outcome.promoted.clone();
        promoted.sort();
        assert_eq!(promoted, vec!["marked", "scratch"]);
        assert_eq!(outcome.dropped, vec!["session:state"]);
    }
}
