//! Session, task and handoff records shared across the coordination API.

use crate::error::CoordinationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Speaker role for a conversation message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Message authored by a cooperating agent rather than the primary assistant.
    Agent,
}

impl Role {
    /// Return the role as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Agent => "agent",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoordinationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "agent" => Ok(Role::Agent),
            other => Err(CoordinationError::Validation(format!(
                "unknown role `{other}`"
            ))),
        }
    }
}

/// One entry of a session's append-only conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

/// A task tracked by a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub task_id: String,
    /// Caller payload, kept verbatim.
    pub task: Value,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Take the id from `task["id"]` when it is a string or number.
    pub fn new(task: Value, status: TaskStatus, now: DateTime<Utc>) -> Self {
        let task_id = match task.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        Self {
            task_id,
            task,
            status,
            created_at: now,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Ended,
}

/// Full session state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub conversation_history: Vec<ConversationMessage>,
    pub pending_tasks: Vec<TaskRecord>,
    pub completed_tasks: Vec<TaskRecord>,
    /// Ordered set: agents appear once, in attach order.
    pub active_agents: Vec<String>,
    /// Agent currently responsible for the session.
    pub lead_agent: Option<String>,
    pub initial_context: Map<String, Value>,
    pub handoff_count: u64,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<String>,
}

impl Session {
    pub(crate) fn new(
        session_id: String,
        tenant_id: Option<String>,
        user_id: Option<String>,
        initial_context: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            tenant_id,
            user_id,
            status: SessionStatus::Active,
            start_time: now,
            last_activity: now,
            conversation_history: Vec::new(),
            pending_tasks: Vec::new(),
            completed_tasks: Vec::new(),
            active_agents: Vec::new(),
            lead_agent: None,
            initial_context,
            handoff_count: 0,
            ended_at: None,
            end_reason: None,
        }
    }

    pub fn is_idle(&self, idle_timeout: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_activity > idle_timeout
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            tenant_id: self.tenant_id.clone(),
            user_id: self.user_id.clone(),
            status: self.status,
            start_time: self.start_time,
            last_activity: self.last_activity,
            message_count: self.conversation_history.len(),
            pending_task_count: self.pending_tasks.len(),
            completed_task_count: self.completed_tasks.len(),
            active_agents: self.active_agents.clone(),
            lead_agent: self.lead_agent.clone(),
        }
    }
}

/// Summary view of a session for listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
    pub pending_task_count: usize,
    pub completed_task_count: usize,
    pub active_agents: Vec<String>,
    pub lead_agent: Option<String>,
}

/// Where a session view was read from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    /// In-process live session.
    Live,
    /// Archive written by `end_session`.
    Archive,
    /// Last state snapshot of a session that was never ended (e.g. after a restart).
    Snapshot,
}

/// Read-only composite returned by `get_full_context`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionContext {
    pub session: Session,
    pub source: ContextSource,
    pub is_idle: bool,
    pub message_count: usize,
    pub pending_task_count: usize,
    pub completed_task_count: usize,
    pub latest_handoff: Option<AgentHandoff>,
}

impl SessionContext {
    pub(crate) fn new(
        session: Session,
        source: ContextSource,
        latest_handoff: Option<AgentHandoff>,
        idle_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            is_idle: session.status == SessionStatus::Active && session.is_idle(idle_timeout, now),
            message_count: session.conversation_history.len(),
            pending_task_count: session.pending_tasks.len(),
            completed_task_count: session.completed_tasks.len(),
            session,
            source,
            latest_handoff,
        }
    }
}

/// Result of `resume_session`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumeSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub resumed_from: ContextSource,
    /// Whether the session had been inactive past the idle timeout.
    pub was_idle: bool,
    pub message_count: usize,
    pub pending_task_count: usize,
    pub completed_task_count: usize,
    pub active_agents: Vec<String>,
    pub lead_agent: Option<String>,
}

/// Session state captured at handoff time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandoffSnapshot {
    /// Most recent messages, oldest first.
    pub conversation_tail: Vec<ConversationMessage>,
    pub pending_tasks: Vec<TaskRecord>,
    pub active_agents: Vec<String>,
    pub message_count: usize,
    pub completed_task_count: usize,
    pub captured_at: DateTime<Utc>,
}

/// Immutable record of responsibility moving from one agent to another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentHandoff {
    pub session_id: String,
    /// 1-based position in the session's handoff history.
    pub sequence: u64,
    pub from_agent: String,
    pub to_agent: String,
    pub timestamp: DateTime<Utc>,
    pub handoff_reason: String,
    /// Stored verbatim.
    pub critical_info: Value,
    pub continuation_instructions: String,
    pub context_snapshot: HandoffSnapshot,
}

#[cfg(test)]
mod tests {
    use super::{Role, Session, TaskRecord, TaskStatus};
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};

    #[test]
    fn role_parses_and_formats() {
        assert_eq!("assistant".parse::<Role>().expect("role"), Role::Assistant);
        assert_eq!(Role::Agent.as_str(), "agent");
        assert!("robot".parse::<Role>().is_err());
    }

    #[test]
    fn task_id_comes_from_payload_when_present() {
        let now = Utc::now();
        assert_eq!(
            TaskRecord::new(json!({"id": "t-1"}), TaskStatus::Pending, now).task_id,
            "t-1"
        );
        assert_eq!(
            TaskRecord::new(json!({"id": 42}), TaskStatus::Pending, now).task_id,
            "42"
        );
        let generated = TaskRecord::new(json!({"id": true}), TaskStatus::Pending, now);
        assert_eq!(generated.task_id.len(), 36);
    }

    #[test]
    fn idle_is_measured_from_last_activity() {
        let now = Utc::now();
        let mut session = Session::new("s1".to_string(), None, None, Map::new(), now);
        assert!(!session.is_idle(Duration::minutes(30), now));
        session.last_activity = now - Duration::minutes(31);
        assert!(session.is_idle(Duration::minutes(30), now));
    }
}
