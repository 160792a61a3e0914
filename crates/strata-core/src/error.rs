//! Error types for session and handoff coordination.

use strata_config::ConfigError;
use strata_memory::MemoryError;
use thiserror::Error;

/// Errors returned by session manager and handoff operations.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Session id was never started, or its archive has expired.
    #[error("unknown session: {0}")]
    UnknownSession(String),
    /// A live or archived session already uses this id.
    #[error("session already exists: {0}")]
    SessionExists(String),
    /// Session has ended; only reads and resume are accepted.
    #[error("session has ended: {0}")]
    SessionEnded(String),
    #[error("task not found (session_id={session_id}, task_id={task_id})")]
    TaskNotFound { session_id: String, task_id: String },
    #[error("task already completed (session_id={session_id}, task_id={task_id})")]
    TaskAlreadyCompleted { session_id: String, task_id: String },
    #[error("task already exists (session_id={session_id}, task_id={task_id})")]
    TaskExists { session_id: String, task_id: String },
    /// Malformed input such as an empty id or an unknown role.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoordinationError {
    /// True when the session, task or entry is absent rather than broken.
    pub fn is_not_found(&self) -> bool {
        match self {
            CoordinationError::UnknownSession(_) | CoordinationError::TaskNotFound { .. } => true,
            CoordinationError::Memory(err) => err.is_not_found(),
            _ => false,
        }
    }
}
