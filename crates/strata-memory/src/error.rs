//! Error types for context store operations.

/// Errors returned by the entry store, coordinators, and persistence backends.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Unknown enum value, empty key, or otherwise malformed input.
    #[error("validation error: {0}")]
    Validation(String),
    /// The identifier required by a scope was not supplied.
    #[error("scope `{scope}` requires `{field}`")]
    MissingIdentifier {
        scope: &'static str,
        field: &'static str,
    },
    /// No live entry exists for the namespace/key.
    #[error("context not found (namespace={namespace}, key={key})")]
    NotFound { namespace: String, key: String },
    /// A caller-supplied expected version did not match the live version.
    #[error(
        "version conflict (namespace={namespace}, key={key}, expected={expected}, actual={actual})"
    )]
    Conflict {
        namespace: String,
        key: String,
        expected: u64,
        actual: u64,
    },
    /// The persistence collaborator could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    /// IO error from a file-backed persistence backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MemoryError {
    /// True for conditions callers should treat as "absent" rather than failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MemoryError::NotFound { .. })
    }

    /// True for input errors: unknown enum values, empty keys, missing scope ids.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MemoryError::Validation(_) | MemoryError::MissingIdentifier { .. }
        )
    }
}
