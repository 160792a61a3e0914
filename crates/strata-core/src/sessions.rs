//! Session manager: live session state machine backed by the context store.
//!
//! Live sessions sit in a map of per-session async mutexes. Every mutation of
//! one session runs under its mutex, which linearizes appends. The map lock
//! is a plain `RwLock` and is never held across an await.

use crate::archive::{ArchiveOutcome, apply_archive_policy};
use crate::error::CoordinationError;
use crate::settings::SessionSettings;
use crate::types::{
    AgentHandoff, ContextSource, ConversationMessage, ResumeSummary, Role, Session,
    SessionContext, SessionStatus, SessionSummary, TaskRecord, TaskStatus,
};
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use strata_memory::{
    ContextCoordinator, ContextScope, MemoryError, MemoryLayer, Priority, ScopeIds, StoreRequest,
};
use tokio::sync::Mutex;

/// Live state snapshot, refreshed on every mutation.
pub(crate) const STATE_KEY: &str = "session:state";
/// Archive written when a session ends.
pub(crate) const ARCHIVE_KEY: &str = "session:archive";
pub(crate) const HANDOFF_LATEST_KEY: &str = "handoff:latest";

pub(crate) const SESSION_CONTEXT_CATEGORY: &str = "session_context";
const STATE_CATEGORY: &str = "session_state";
const ARCHIVE_CATEGORY: &str = "session_archive";
pub(crate) const SOURCE: &str = "session_manager";

pub(crate) fn handoff_key(sequence: u64) -> String {
    format!("handoff:{sequence}")
}

/// Keys the session manager owns inside a session namespace.
pub(crate) fn is_reserved_key(key: &str) -> bool {
    key.starts_with("session:") || key.starts_with("handoff:")
}

pub(crate) struct LiveSession {
    pub(crate) session: Session,
    pub(crate) handoffs: Vec<AgentHandoff>,
    /// Set when the session has been ended and unlinked from the live map.
    pub(crate) released: bool,
}

pub(crate) type LiveSlot = Arc<Mutex<LiveSession>>;

/// Tracks sessions, their conversation and tasks, and agent handoffs.
pub struct SessionManager {
    pub(crate) coordinator: Arc<dyn ContextCoordinator>,
    pub(crate) settings: SessionSettings,
    live: RwLock<HashMap<String, LiveSlot>>,
}

impl SessionManager {
    pub fn new(coordinator: Arc<dyn ContextCoordinator>, settings: SessionSettings) -> Self {
        Self {
            coordinator,
            settings,
            live: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a new session. Each key of `initial_context` becomes a
    /// session-layer entry in the session namespace.
    ///
    /// Fails with `SessionExists` if the id is live, archived, or has a state
    /// snapshot left by an earlier process.
    pub async fn start_session(
        &self,
        session_id: &str,
        tenant_id: Option<String>,
        user_id: Option<String>,
        initial_context: Map<String, Value>,
    ) -> Result<Session, CoordinationError> {
        require_id("session_id", session_id)?;
        if let Some(key) = initial_context.keys().find(|key| is_reserved_key(key)) {
            return Err(CoordinationError::Validation(format!(
                "initial context key `{key}` is reserved"
            )));
        }
        let is_live = self.live.read().contains_key(session_id);
        if is_live || self.load_stored(session_id).await?.is_some() {
            return Err(CoordinationError::SessionExists(session_id.to_string()));
        }

        let session = Session::new(
            session_id.to_string(),
            tenant_id,
            user_id,
            initial_context,
            Utc::now(),
        );
        let slot: LiveSlot = Arc::new(Mutex::new(LiveSession {
            session,
            handoffs: Vec::new(),
            released: false,
        }));
        // Lock before publishing so nothing observes a half-started session.
        let mut live = Arc::clone(&slot).lock_owned().await;
        {
            let mut sessions = self.live.write();
            if sessions.contains_key(session_id) {
                return Err(CoordinationError::SessionExists(session_id.to_string()));
            }
            sessions.insert(session_id.to_string(), Arc::clone(&slot));
        }

        if let Err(err) = self.seed_session(&live.session).await {
            live.released = true;
            self.unlink(session_id, &slot);
            warn!(
                "failed to start session (session_id={}, error={})",
                session_id, err
            );
            return Err(err);
        }
        info!(
            "started session (session_id={}, context_keys={})",
            session_id,
            live.session.initial_context.len()
        );
        Ok(live.session.clone())
    }

    /// Append a message to the conversation history.
    pub async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: impl Into<String>,
        metadata: Value,
    ) -> Result<ConversationMessage, CoordinationError> {
        let slot = self.live_slot(session_id).await?;
        let mut live = slot.lock().await;
        ensure_open(&live)?;
        let message = ConversationMessage {
            role,
            content: content.into(),
            metadata,
            timestamp: Utc::now(),
        };
        live.session.conversation_history.push(message.clone());
        live.session.last_activity = message.timestamp;
        debug!(
            "appended message (session_id={}, role={}, content_len={})",
            session_id,
            role,
            message.content.len()
        );
        self.write_snapshot(&live.session).await?;
        Ok(message)
    }

    /// Queue a task. Completion goes through [`SessionManager::complete_task`].
    pub async fn add_task(
        &self,
        session_id: &str,
        task: Value,
        status: TaskStatus,
    ) -> Result<TaskRecord, CoordinationError> {
        if status == TaskStatus::Completed {
            return Err(CoordinationError::Validation(
                "tasks are added as pending or in_progress; use complete_task".to_string(),
            ));
        }
        let slot = self.live_slot(session_id).await?;
        let mut live = slot.lock().await;
        ensure_open(&live)?;
        let now = Utc::now();
        let record = TaskRecord::new(task, status, now);
        let session = &mut live.session;
        if session
            .pending_tasks
            .iter()
            .chain(session.completed_tasks.iter())
            .any(|task| task.task_id == record.task_id)
        {
            return Err(CoordinationError::TaskExists {
                session_id: session_id.to_string(),
                task_id: record.task_id,
            });
        }
        session.pending_tasks.push(record.clone());
        session.last_activity = now;
        debug!(
            "added task (session_id={}, task_id={}, status={:?})",
            session_id, record.task_id, record.status
        );
        self.write_snapshot(&live.session).await?;
        Ok(record)
    }

    /// Move a task from pending to completed. Happens at most once per task.
    pub async fn complete_task(
        &self,
        session_id: &str,
        task_id: &str,
    ) -> Result<TaskRecord, CoordinationError> {
        let slot = self.live_slot(session_id).await?;
        let mut live = slot.lock().await;
        ensure_open(&live)?;
        let session = &mut live.session;
        let Some(position) = session
            .pending_tasks
            .iter()
            .position(|task| task.task_id == task_id)
        else {
            let err = if session
                .completed_tasks
                .iter()
                .any(|task| task.task_id == task_id)
            {
                CoordinationError::TaskAlreadyCompleted {
                    session_id: session_id.to_string(),
                    task_id: task_id.to_string(),
                }
            } else {
                CoordinationError::TaskNotFound {
                    session_id: session_id.to_string(),
                    task_id: task_id.to_string(),
                }
            };
            return Err(err);
        };
        let now = Utc::now();
        let mut task = session.pending_tasks.remove(position);
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        session.completed_tasks.push(task.clone());
        session.last_activity = now;
        debug!(
            "completed task (session_id={}, task_id={})",
            session_id, task_id
        );
        self.write_snapshot(&live.session).await?;
        Ok(task)
    }

    /// Add an agent to the active set; the first agent becomes the lead.
    pub async fn attach_agent(
        &self,
        session_id: &str,
        agent_id: &str,
    ) -> Result<Vec<String>, CoordinationError> {
        require_id("agent_id", agent_id)?;
        let slot = self.live_slot(session_id).await?;
        let mut live = slot.lock().await;
        ensure_open(&live)?;
        let session = &mut live.session;
        if !session.active_agents.iter().any(|agent| agent == agent_id) {
            session.active_agents.push(agent_id.to_string());
        }
        if session.lead_agent.is_none() {
            session.lead_agent = Some(agent_id.to_string());
        }
        session.last_activity = Utc::now();
        debug!(
            "attached agent (session_id={}, agent_id={})",
            session_id, agent_id
        );
        self.write_snapshot(&live.session).await?;
        Ok(live.session.active_agents.clone())
    }

    /// Remove an agent from the active set. Detaching an absent agent is a no-op.
    pub async fn detach_agent(
        &self,
        session_id: &str,
        agent_id: &str,
    ) -> Result<Vec<String>, CoordinationError> {
        let slot = self.live_slot(session_id).await?;
        let mut live = slot.lock().await;
        ensure_open(&live)?;
        let session = &mut live.session;
        session.active_agents.retain(|agent| agent != agent_id);
        if session.lead_agent.as_deref() == Some(agent_id) {
            session.lead_agent = session.active_agents.first().cloned();
        }
        session.last_activity = Utc::now();
        debug!(
            "detached agent (session_id={}, agent_id={})",
            session_id, agent_id
        );
        self.write_snapshot(&live.session).await?;
        Ok(live.session.active_agents.clone())
    }

    /// Reactivate a session. Idempotent for live sessions; ended or evicted
    /// sessions are restored from their archive (or last snapshot).
    pub async fn resume_session(
        &self,
        session_id: &str,
    ) -> Result<ResumeSummary, CoordinationError> {
        let existing = self.live_entry(session_id);
        if let Some(slot) = existing {
            let mut live = slot.lock().await;
            if !live.released {
                let now = Utc::now();
                let was_idle = live.session.is_idle(self.settings.idle_timeout, now);
                live.session.last_activity = now;
                self.write_snapshot(&live.session).await?;
                debug!(
                    "resumed live session (session_id={}, was_idle={})",
                    session_id, was_idle
                );
                return Ok(resume_summary(&live.session, ContextSource::Live, was_idle));
            }
        }

        let Some((mut session, source)) = self.load_stored(session_id).await? else {
            return Err(CoordinationError::UnknownSession(session_id.to_string()));
        };
        let handoffs = self.load_handoffs(&session).await?;
        let now = Utc::now();
        let was_idle = session.is_idle(self.settings.idle_timeout, now);
        session.status = SessionStatus::Active;
        session.ended_at = None;
        session.end_reason = None;
        session.last_activity = now;

        let slot: LiveSlot = Arc::new(Mutex::new(LiveSession {
            session,
            handoffs,
            released: false,
        }));
        let live = Arc::clone(&slot).lock_owned().await;
        let raced = {
            let mut sessions = self.live.write();
            match sessions.get(session_id) {
                Some(current) => Some(Arc::clone(current)),
                None => {
                    sessions.insert(session_id.to_string(), Arc::clone(&slot));
                    None
                }
            }
        };
        if let Some(current) = raced {
            drop(live);
            // Another caller restored it first; resuming again is a no-op.
            let current = current.lock().await;
            return Ok(resume_summary(&current.session, ContextSource::Live, false));
        }
        self.write_snapshot(&live.session).await?;
        if source == ContextSource::Archive {
            // The snapshot is current now; a stale archive would win on reload.
            self.coordinator
                .delete(
                    ARCHIVE_KEY,
                    ContextScope::Session,
                    &session_ids(&live.session),
                    Some(MemoryLayer::LongTerm),
                )
                .await?;
        }
        info!(
            "resumed session (session_id={}, source={:?}, messages={})",
            session_id,
            source,
            live.session.conversation_history.len()
        );
        Ok(resume_summary(&live.session, source, was_idle))
    }

    /// End a session: archive it, apply the archive policy to its working
    /// entries, then release it from the live set.
    pub async fn end_session(
        &self,
        session_id: &str,
        reason: Option<String>,
    ) -> Result<Session, CoordinationError> {
        let slot = self.live_slot(session_id).await?;
        let mut live = slot.lock().await;
        ensure_open(&live)?;

        let now = Utc::now();
        let mut ended = live.session.clone();
        ended.status = SessionStatus::Ended;
        ended.ended_at = Some(now);
        ended.end_reason = reason;
        ended.last_activity = now;

        let ids = session_ids(&ended);
        self.coordinator
            .store(
                StoreRequest::new(
                    ARCHIVE_KEY,
                    serde_json::to_value(&ended)?,
                    MemoryLayer::LongTerm,
                    ContextScope::Session,
                )
                .with_ids(ids.clone())
                .with_category(ARCHIVE_CATEGORY)
                .with_source(SOURCE)
                .with_priority(Priority::High),
            )
            .await?;
        live.session = ended;

        // The archive exists from here on, so the session is released even if
        // the policy pass fails.
        let outcome = apply_archive_policy(
            self.coordinator.as_ref(),
            self.settings.archive_policy,
            &ids,
            is_reserved_key,
        )
        .await;
        live.released = true;
        self.unlink(session_id, &slot);
        let outcome: ArchiveOutcome = outcome?;
        info!(
            "ended session (session_id={}, reason={}, promoted={}, dropped={})",
            session_id,
            live.session.end_reason.as_deref().unwrap_or("none"),
            outcome.promoted.len(),
            outcome.dropped.len()
        );
        Ok(live.session.clone())
    }

    /// Read-only view of a session: live state, else its archive, else its
    /// last snapshot.
    pub async fn get_full_context(
        &self,
        session_id: &str,
    ) -> Result<SessionContext, CoordinationError> {
        let existing = self.live_entry(session_id);
        if let Some(slot) = existing {
            let live = slot.lock().await;
            if !live.released {
                return Ok(SessionContext::new(
                    live.session.clone(),
                    ContextSource::Live,
                    live.handoffs.last().cloned(),
                    self.settings.idle_timeout,
                    Utc::now(),
                ));
            }
        }
        let Some((session, source)) = self.load_stored(session_id).await? else {
            return Err(CoordinationError::UnknownSession(session_id.to_string()));
        };
        let latest = self.stored_latest_handoff(&session_ids(&session)).await?;
        Ok(SessionContext::new(
            session,
            source,
            latest,
            self.settings.idle_timeout,
            Utc::now(),
        ))
    }

    /// Summaries of live sessions, most recently active first.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let slots: Vec<LiveSlot> = self.live.read().values().cloned().collect();
        let mut summaries = Vec::with_capacity(slots.len());
        for slot in slots {
            let live = slot.lock().await;
            if !live.released {
                summaries.push(live.session.summary());
            }
        }
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        summaries
    }

    pub(crate) fn live_entry(&self, session_id: &str) -> Option<LiveSlot> {
        self.live.read().get(session_id).cloned()
    }

    /// Live slot for `session_id`, or the reason there is none.
    pub(crate) async fn live_slot(&self, session_id: &str) -> Result<LiveSlot, CoordinationError> {
        match self.live_entry(session_id) {
            Some(slot) => Ok(slot),
            None if self.archive_exists(session_id).await? => {
                Err(CoordinationError::SessionEnded(session_id.to_string()))
            }
            None => Err(CoordinationError::UnknownSession(session_id.to_string())),
        }
    }

    /// Refresh the state snapshot entry for a live session.
    pub(crate) async fn write_snapshot(&self, session: &Session) -> Result<(), CoordinationError> {
        self.coordinator
            .store(
                StoreRequest::new(
                    STATE_KEY,
                    serde_json::to_value(session)?,
                    MemoryLayer::Session,
                    ContextScope::Session,
                )
                .with_ids(session_ids(session))
                .with_category(STATE_CATEGORY)
                .with_source(SOURCE),
            )
            .await?;
        Ok(())
    }

    /// Session previously written to the store, with where it came from.
    pub(crate) async fn load_stored(
        &self,
        session_id: &str,
    ) -> Result<Option<(Session, ContextSource)>, CoordinationError> {
        let ids = ScopeIds::session(session_id);
        for (key, source) in [
            (ARCHIVE_KEY, ContextSource::Archive),
            (STATE_KEY, ContextSource::Snapshot),
        ] {
            if let Some(value) = self.stored_value(key, &ids).await? {
                let session: Session = serde_json::from_value(value)?;
                return Ok(Some((session, source)));
            }
        }
        Ok(None)
    }

    /// Value of a session-scoped entry, `None` when absent or expired.
    pub(crate) async fn stored_value(
        &self,
        key: &str,
        ids: &ScopeIds,
    ) -> Result<Option<Value>, CoordinationError> {
        match self
            .coordinator
            .retrieve(key, ContextScope::Session, ids)
            .await
        {
            Ok(entry) => Ok(Some(entry.value)),
            Err(MemoryError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn archive_exists(&self, session_id: &str) -> Result<bool, CoordinationError> {
        if session_id.trim().is_empty() {
            return Ok(false);
        }
        Ok(self
            .stored_value(ARCHIVE_KEY, &ScopeIds::session(session_id))
            .await?
            .is_some())
    }

    async fn seed_session(&self, session: &Session) -> Result<(), CoordinationError> {
        let ids = session_ids(session);
        for (key, value) in &session.initial_context {
            self.coordinator
                .store(
                    StoreRequest::new(
                        key.clone(),
                        value.clone(),
                        MemoryLayer::Session,
                        ContextScope::Session,
                    )
                    .with_ids(ids.clone())
                    .with_category(SESSION_CONTEXT_CATEGORY)
                    .with_source(SOURCE)
                    .with_metadata(json!({})),
                )
                .await?;
        }
        self.write_snapshot(session).await
    }

    fn unlink(&self, session_id: &str, slot: &LiveSlot) {
        let mut sessions = self.live.write();
        if sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            sessions.remove(session_id);
        }
    }
}

/// Identifiers used for every entry a session writes.
pub(crate) fn session_ids(session: &Session) -> ScopeIds {
    ScopeIds {
        tenant_id: session.tenant_id.clone(),
        user_id: session.user_id.clone(),
        session_id: Some(session.session_id.clone()),
        agent_id: None,
    }
}

pub(crate) fn ensure_open(live: &LiveSession) -> Result<(), CoordinationError> {
    if live.released || live.session.status == SessionStatus::Ended {
        return Err(CoordinationError::SessionEnded(
            live.session.session_id.clone(),
        ));
    }
    Ok(())
}

pub(crate) fn require_id(field: &str, value: &str) -> Result<(), CoordinationError> {
    if value.trim().is_empty() {
        return Err(CoordinationError::Validation(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

fn resume_summary(session: &Session, source: ContextSource, was_idle: bool) -> ResumeSummary {
    ResumeSummary {
        session_id: session.session_id.clone(),
        status: session.status,
        resumed_from: source,
        was_idle,
        message_count: session.conversation_history.len(),
        pending_task_count: session.pending_tasks.len(),
        completed_task_count: session.completed_tasks.len(),
        active_agents: session.active_agents.clone(),
        lead_agent: session.lead_agent.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::SessionManager;
    use crate::error::CoordinationError;
    use crate::settings::SessionSettings;
    use crate::types::{ContextSource, Role, SessionStatus, TaskStatus};
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};
    use std::sync::Arc;
    use strata_memory::{
        ContextCoordinator, ContextScope, CoordinatorOptions, InMemoryCoordinator, ScopeIds,
    };

    fn manager() -> SessionManager {
        let coordinator: Arc<dyn ContextCoordinator> =
            Arc::new(InMemoryCoordinator::new(&CoordinatorOptions {
                sweep_interval: None,
                ..CoordinatorOptions::default()
            }));
        SessionManager::new(coordinator, SessionSettings::default())
    }

    #[tokio::test]
    async fn start_rejects_duplicates_and_reserved_keys() {
        let manager = manager();
        manager
            .start_session("s1", None, None, Map::new())
            .await
            .expect("start");
        let err = manager
            .start_session("s1", None, None, Map::new())
            .await
            .expect_err("duplicate");
        assert!(matches!(err, CoordinationError::SessionExists(_)));

        let mut context = Map::new();
        context.insert("handoff:latest".to_string(), json!(1));
        let err = manager
            .start_session("s2", None, None, context)
            .await
            .expect_err("reserved");
        assert!(matches!(err, CoordinationError::Validation(_)));

        let err = manager
            .start_session(" ", None, None, Map::new())
            .await
            .expect_err("empty id");
        assert!(matches!(err, CoordinationError::Validation(_)));
    }

    #[tokio::test]
    async fn initial_context_is_stored_as_session_entries() {
        let manager = manager();
        let mut context = Map::new();
        context.insert("goal".to_string(), json!("ship it"));
        manager
            .start_session("s1", Some("acme".to_string()), None, context)
            .await
            .expect("start");
        let entry = manager
            .coordinator
            .retrieve("goal", ContextScope::Session, &ScopeIds::session("s1"))
            .await
            .expect("context entry");
        assert_eq!(entry.value, json!("ship it"));
        assert_eq!(entry.category, "session_context");
        assert_eq!(entry.ids.tenant_id.as_deref(), Some("acme"));
    }

    #[tokio::test]
    async fn history_keeps_append_order_and_tasks_complete_once() {
        let manager = manager();
        manager
            .start_session("s1", None, None, Map::new())
            .await
            .expect("start");
        for n in 0..3 {
            manager
                .add_message("s1", Role::User, format!("m{n}"), json!({}))
                .await
                .expect("message");
        }
        let task = manager
            .add_task("s1", json!({"id": "t1", "title": "review"}), TaskStatus::Pending)
            .await
            .expect("task");
        assert_eq!(task.task_id, "t1");
        let err = manager
            .add_task("s1", json!({"id": "t1"}), TaskStatus::InProgress)
            .await
            .expect_err("duplicate task");
        assert!(matches!(err, CoordinationError::TaskExists { .. }));

        let done = manager.complete_task("s1", "t1").await.expect("complete");
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());
        let err = manager
            .complete_task("s1", "t1")
            .await
            .expect_err("twice");
        assert!(matches!(err, CoordinationError::TaskAlreadyCompleted { .. }));
        let err = manager
            .complete_task("s1", "nope")
            .await
            .expect_err("missing");
        assert!(err.is_not_found());

        let context = manager.get_full_context("s1").await.expect("context");
        let contents: Vec<&str> = context
            .session
            .conversation_history
            .iter()
            .map(|message| message.content.as_str())
            .collect();
        assert_eq!(contents, vec!["m0", "m1", "m2"]);
        assert_eq!(context.pending_task_count, 0);
        assert_eq!(context.completed_task_count, 1);
        assert_eq!(context.source, ContextSource::Live);
    }

    #[tokio::test]
    async fn completed_status_is_not_accepted_by_add_task() {
        let manager = manager();
        manager
            .start_session("s1", None, None, Map::new())
            .await
            .expect("start");
        let err = manager
            .add_task("s1", json!({}), TaskStatus::Completed)
            .await
            .expect_err("completed");
        assert!(matches!(err, CoordinationError::Validation(_)));
    }

    #[tokio::test]
    async fn agents_form_an_ordered_set_with_a_lead() {
        let manager = manager();
        manager
            .start_session("s1", None, None, Map::new())
            .await
            .expect("start");
        manager.attach_agent("s1", "a").await.expect("a");
        manager.attach_agent("s1", "b").await.expect("b");
        let agents = manager.attach_agent("s1", "a").await.expect("a again");
        assert_eq!(agents, vec!["a", "b"]);

        let agents = manager.detach_agent("s1", "a").await.expect("detach");
        assert_eq!(agents, vec!["b"]);
        let context = manager.get_full_context("s1").await.expect("context");
        assert_eq!(context.session.lead_agent.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn ended_sessions_reject_mutations_and_can_resume() {
        let manager = manager();
        manager
            .start_session("s1", None, None, Map::new())
            .await
            .expect("start");
        manager
            .add_message("s1", Role::Assistant, "hello", json!({}))
            .await
            .expect("message");
        let ended = manager
            .end_session("s1", Some("done".to_string()))
            .await
            .expect("end");
        assert_eq!(ended.status, SessionStatus::Ended);
        assert_eq!(ended.end_reason.as_deref(), Some("done"));

        let err = manager
            .add_message("s1", Role::User, "late", json!({}))
            .await
            .expect_err("ended");
        assert!(matches!(err, CoordinationError::SessionEnded(_)));
        let err = manager
            .start_session("s1", None, None, Map::new())
            .await
            .expect_err("archived id");
        assert!(matches!(err, CoordinationError::SessionExists(_)));
        assert!(manager.list_sessions().await.is_empty());

        let resumed = manager.resume_session("s1").await.expect("resume");
        assert_eq!(resumed.status, SessionStatus::Active);
        assert_eq!(resumed.resumed_from, ContextSource::Archive);
        assert_eq!(resumed.message_count, 1);

        let again = manager.resume_session("s1").await.expect("idempotent");
        assert_eq!(again.resumed_from, ContextSource::Live);
        assert_eq!(again.status, SessionStatus::Active);
        manager
            .add_message("s1", Role::User, "back", json!({}))
            .await
            .expect("mutable again");
    }

    #[tokio::test]
    async fn resume_reports_idle_sessions() {
        let coordinator: Arc<dyn ContextCoordinator> =
            Arc::new(InMemoryCoordinator::new(&CoordinatorOptions::default()));
        let manager = SessionManager::new(
            coordinator,
            SessionSettings {
                idle_timeout: Duration::zero(),
                ..SessionSettings::default()
            },
        );
        manager
            .start_session("s1", None, None, Map::new())
            .await
            .expect("start");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let resumed = manager.resume_session("s1").await.expect("resume");
        assert!(resumed.was_idle);
    }

    #[tokio::test]
    async fn unknown_sessions_are_not_found() {
        let manager = manager();
        let err = manager.get_full_context("ghost").await.expect_err("ghost");
        assert!(err.is_not_found());
        let err = manager
            .add_message("ghost", Role::User, "hi", json!({}))
            .await
            .expect_err("ghost");
        assert!(matches!(err, CoordinationError::UnknownSession(_)));
        assert!(manager.resume_session("ghost").await.is_err());
    }
}
