use serde_json::Value;
use std::time::Duration;
use strata_memory::{ContextScope, CoordinatorOptions, MemoryLayer, ScopeIds, StoreRequest};

/// Coordinator options with the sweeper off and a short init timeout.
pub fn quiet_options() -> CoordinatorOptions {
    CoordinatorOptions {
        sweep_interval: None,
        init_timeout: Duration::from_millis(200),
        ..CoordinatorOptions::default()
    }
}

/// Session-layer, session-scoped request for `session_id`.
pub fn session_request(key: &str, value: Value, session_id: &str) -> StoreRequest {
    StoreRequest::new(key, value, MemoryLayer::Session, ContextScope::Session)
        .with_ids(ScopeIds::session(session_id))
}
