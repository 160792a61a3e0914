//! Context entry model and the closed enumerations it is keyed by.

use crate::error::MemoryError;
use crate::scope::Namespace;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Retention tier for a context entry, ordered from shortest to longest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayer {
    Ephemeral,
    Session,
    ShortTerm,
    LongTerm,
    Permanent,
}

impl MemoryLayer {
    /// Every layer in lookup order (fastest first).
    pub const ALL: [MemoryLayer; 5] = [
        MemoryLayer::Ephemeral,
        MemoryLayer::Session,
        MemoryLayer::ShortTerm,
        MemoryLayer::LongTerm,
        MemoryLayer::Permanent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryLayer::Ephemeral => "ephemeral",
            MemoryLayer::Session => "session",
            MemoryLayer::ShortTerm => "short_term",
            MemoryLayer::LongTerm => "long_term",
            MemoryLayer::Permanent => "permanent",
        }
    }

    /// Position in `ALL`, used for per-layer counters.
    pub(crate) fn ordinal(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for MemoryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryLayer {
    type Err = MemoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        MemoryLayer::ALL
            .into_iter()
            .find(|layer| layer.as_str() == value)
            .ok_or_else(|| MemoryError::Validation(format!("unknown layer `{value}`")))
    }
}

/// Visibility domain for a context entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    Global,
    Tenant,
    User,
    Session,
    Agent,
}

impl ContextScope {
    pub const ALL: [ContextScope; 5] = [
        ContextScope::Global,
        ContextScope::Tenant,
        ContextScope::User,
        ContextScope::Session,
        ContextScope::Agent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextScope::Global => "global",
            ContextScope::Tenant => "tenant",
            ContextScope::User => "user",
            ContextScope::Session => "session",
            ContextScope::Agent => "agent",
        }
    }
}

impl fmt::Display for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextScope {
    type Err = MemoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ContextScope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == value)
            .ok_or_else(|| MemoryError::Validation(format!("unknown scope `{value}`")))
    }
}

/// Informational priority; decides eviction order under capacity pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// Higher is more important.
    pub fn weight(&self) -> u8 {
        match self {
            Priority::Critical => 3,
            Priority::High => 2,
            Priority::Medium => 1,
            Priority::Low => 0,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = MemoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(MemoryError::Validation(format!(
                "unknown priority `{other}`"
            ))),
        }
    }
}

/// Caller-supplied identifiers, trusted as given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl ScopeIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self::new().with_tenant(tenant_id)
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self::new().with_user(user_id)
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Self::new().with_session(session_id)
    }

    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self::new().with_agent(agent_id)
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// A stored context entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextEntry {
    /// Stable id, kept across overwrites of a live entry.
    pub entry_id: Uuid,
    pub key: String,
    pub value: Value,
    pub layer: MemoryLayer,
    pub scope: ContextScope,
    pub priority: Priority,
    pub category: String,
    pub source: String,
    #[serde(flatten)]
    pub ids: ScopeIds,
    /// Passed through verbatim, never interpreted by the store.
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub sync_version: u64,
}

impl ContextEntry {
    /// An entry is logically absent once `expires_at` is reached.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Input to `Store`: everything the caller controls about an entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRequest {
    pub key: String,
    pub value: Value,
    pub layer: MemoryLayer,
    pub scope: ContextScope,
    pub priority: Priority,
    pub category: String,
    pub source: String,
    pub ids: ScopeIds,
    pub metadata: Value,
    /// Overrides the layer default TTL for this entry only; `0` is already expired.
    pub expires_in_seconds: Option<u64>,
    /// When set, the write fails with `Conflict` unless the live version matches
    /// (0 meaning "no live entry").
    pub expected_version: Option<u64>,
}

impl StoreRequest {
    pub fn new(
        key: impl Into<String>,
        value: Value,
        layer: MemoryLayer,
        scope: ContextScope,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            layer,
            scope,
            priority: Priority::default(),
            category: "general".to_string(),
            source: "unknown".to_string(),
            ids: ScopeIds::default(),
            metadata: Value::Object(serde_json::Map::new()),
            expires_in_seconds: None,
            expected_version: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_ids(mut self, ids: ScopeIds) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn expires_in(mut self, seconds: u64) -> Self {
        self.expires_in_seconds = Some(seconds);
        self
    }

    pub fn expect_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Rebuild a request that rewrites `entry` into another layer.
    pub fn from_entry(entry: &ContextEntry, layer: MemoryLayer) -> Self {
        Self {
            key: entry.key.clone(),
            value: entry.value.clone(),
            layer,
            scope: entry.scope,
            priority: entry.priority,
            category: entry.category.clone(),
            source: entry.source.clone(),
            ids: entry.ids.clone(),
            metadata: entry.metadata.clone(),
            expires_in_seconds: None,
            expected_version: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), MemoryError> {
        if self.key.trim().is_empty() {
            return Err(MemoryError::Validation("key must not be empty".to_string()));
        }
        if !self.metadata.is_object() {
            return Err(MemoryError::Validation(format!(
                "metadata for key `{}` must be an object",
                self.key
            )));
        }
        Ok(())
    }
}

/// Result of a successful `Store`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreReceipt {
    pub entry_id: Uuid,
    pub key: String,
    pub namespace: String,
    pub layer: MemoryLayer,
    pub scope: ContextScope,
    pub sync_version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Address of one entry slot: (layer, namespace, key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub layer: MemoryLayer,
    pub namespace: Namespace,
    pub key: String,
}

impl EntryKey {
    pub fn new(layer: MemoryLayer, namespace: Namespace, key: impl Into<String>) -> Self {
        Self {
            layer,
            namespace,
            key: key.into(),
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.layer, self.namespace, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::{ContextScope, MemoryLayer, Priority, StoreRequest};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn enums_parse_their_wire_names() {
        for layer in MemoryLayer::ALL {
            assert_eq!(layer.as_str().parse::<MemoryLayer>().expect("layer"), layer);
        }
        for scope in ContextScope::ALL {
            assert_eq!(scope.as_str().parse::<ContextScope>().expect("scope"), scope);
        }
        assert_eq!("critical".parse::<Priority>().expect("priority"), Priority::Critical);
    }

    #[test]
    fn unknown_values_are_validation_errors() {
        let err = "forever".parse::<MemoryLayer>().expect_err("layer");
        assert!(err.is_validation());
        let err = "team".parse::<ContextScope>().expect_err("scope");
        assert!(err.is_validation());
        let err = "urgent".parse::<Priority>().expect_err("priority");
        assert!(err.is_validation());
    }

    #[test]
    fn layer_serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_value(MemoryLayer::ShortTerm).expect("json"),
            json!("short_term")
        );
        let layer: MemoryLayer = serde_json::from_value(json!("long_term")).expect("layer");
        assert_eq!(layer, MemoryLayer::LongTerm);
    }

    #[test]
    fn request_rejects_blank_key_and_non_object_metadata() {
        let blank = StoreRequest::new("  ", json!(1), MemoryLayer::Session, ContextScope::Global);
        assert!(blank.validate().is_err());

        let bad_metadata =
            StoreRequest::new("k", json!(1), MemoryLayer::Session, ContextScope::Global)
                .with_metadata(json!([1, 2]));
        assert!(bad_metadata.validate().is_err());
    }
}
