//! Agent-to-agent handoffs with an immutable snapshot of session state.

use crate::error::CoordinationError;
use crate::sessions::{
    HANDOFF_LATEST_KEY, SOURCE, SessionManager, ensure_open, handoff_key, require_id,
    session_ids,
};
use crate::types::{AgentHandoff, HandoffSnapshot, Session};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::Value;
use strata_memory::{ContextScope, Priority, ScopeIds, StoreRequest};

const HANDOFF_CATEGORY: &str = "handoff";
/// `from_agent` when no agent was leading the session.
pub const UNASSIGNED_AGENT: &str = "unassigned";

fn snapshot(session: &Session, tail: usize, now: DateTime<Utc>) -> HandoffSnapshot {
    let history = &session.conversation_history;
    let start = history.len().saturating_sub(tail);
    HandoffSnapshot {
        conversation_tail: history[start..].to_vec(),
        pending_tasks: session.pending_tasks.clone(),
        active_agents: session.active_agents.clone(),
        message_count: history.len(),
        completed_task_count: session.completed_tasks.len(),
        captured_at: now,
    }
}

impl SessionManager {
    /// Hand the session to `to_agent`, recording who had it and what they
    /// knew. The record is stored outside live session state so it outlives
    /// the session.
    pub async fn handoff_to_agent(
        &self,
        session_id: &str,
        to_agent: &str,
        reason: impl Into<String>,
        critical_info: Value,
        instructions: impl Into<String>,
    ) -> Result<AgentHandoff, CoordinationError> {
        require_id("to_agent", to_agent)?;
        let slot = self.live_slot(session_id).await?;
        let mut live = slot.lock().await;
        ensure_open(&live)?;

        let now = Utc::now();
        let handoff = AgentHandoff {
            session_id: session_id.to_string(),
            sequence: live.session.handoff_count + 1,
            from_agent: live
                .session
                .lead_agent
                .clone()
                .unwrap_or_else(|| UNASSIGNED_AGENT.to_string()),
            to_agent: to_agent.to_string(),
            timestamp: now,
            handoff_reason: reason.into(),
            critical_info,
            continuation_instructions: instructions.into(),
            context_snapshot: snapshot(&live.session, self.settings.handoff_history_tail, now),
        };

        let ids = session_ids(&live.session);
        let value = serde_json::to_value(&handoff)?;
        for key in [handoff_key(handoff.sequence), HANDOFF_LATEST_KEY.to_string()] {
            self.coordinator
                .store(
                    StoreRequest::new(
                        key,
                        value.clone(),
                        self.settings.handoff_layer,
                        ContextScope::Session,
                    )
                    .with_ids(ids.clone())
                    .with_category(HANDOFF_CATEGORY)
                    .with_source(SOURCE)
                    .with_priority(Priority::High),
                )
                .await?;
        }

        let session = &mut live.session;
        if !session.active_agents.iter().any(|agent| agent == to_agent) {
            session.active_agents.push(to_agent.to_string());
        }
        session.lead_agent = Some(to_agent.to_string());
        session.handoff_count = handoff.sequence;
        session.last_activity = now;
        live.handoffs.push(handoff.clone());
        self.write_snapshot(&live.session).await?;

        info!(
            "handed off session (session_id={}, sequence={}, from={}, to={}, layer={})",
            session_id,
            handoff.sequence,
            handoff.from_agent,
            handoff.to_agent,
            self.settings.handoff_layer
        );
        Ok(handoff)
    }

    /// Most recent handoff, or `None` if the session was never handed off.
    pub async fn get_handoff_context(
        &self,
        session_id: &str,
    ) -> Result<Option<AgentHandoff>, CoordinationError> {
        let existing = self.live_entry(session_id);
        if let Some(slot) = existing {
            let live = slot.lock().await;
            if !live.released {
                return Ok(live.handoffs.last().cloned());
            }
        }
        self.stored_latest_handoff(&ScopeIds::session(session_id))
            .await
    }

    /// Every handoff of the session, oldest first.
    pub async fn handoff_history(
        &self,
        session_id: &str,
    ) -> Result<Vec<AgentHandoff>, CoordinationError> {
        let existing = self.live_entry(session_id);
        if let Some(slot) = existing {
            let live = slot.lock().await;
            if !live.released {
                return Ok(live.handoffs.clone());
            }
        }
        match self.load_stored(session_id).await? {
            Some((session, _)) => self.load_handoffs(&session).await,
            None => Err(CoordinationError::UnknownSession(session_id.to_string())),
        }
    }

    pub(crate) async fn stored_latest_handoff(
        &self,
        ids: &ScopeIds,
    ) -> Result<Option<AgentHandoff>, CoordinationError> {
        match self.stored_value(HANDOFF_LATEST_KEY, ids).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Reload `handoff:1..=n` for a stored session. Expired records are skipped.
    pub(crate) async fn load_handoffs(
        &self,
        session: &Session,
    ) -> Result<Vec<AgentHandoff>, CoordinationError> {
        let ids = session_ids(session);
        let mut handoffs = Vec::new();
        for sequence in 1..=session.handoff_count {
            match self.stored_value(&handoff_key(sequence), &ids).await? {
                Some(value) => handoffs.push(serde_json::from_value(value)?),
                None => warn!(
                    "handoff record missing (session_id={}, key={}, layer={})",
                    session.session_id,
                    handoff_key(sequence),
                    self.settings.handoff_layer
                ),
            }
        }
        Ok(handoffs)
    }
}

#[cfg(test)]
mod tests {
    use super::snapshot;
    use crate::types::{ConversationMessage, Role, Session};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};

    #[test]
    fn snapshot_keeps_only_the_tail() {
        let now = Utc::now();
        let mut session = Session::new("s1".to_string(), None, None, Map::new(), now);
        for n in 0..5 {
            session.conversation_history.push(ConversationMessage {
                role: Role::User,
                content: format!("m{n}"),
                metadata: json!({}),
                timestamp: now,
            });
        }
        let snap = snapshot(&session, 2, now);
        let tail: Vec<&str> = snap
            .conversation_tail
            .iter()
            .map(|message| message.content.as_str())
            .collect();
        assert_eq!(tail, vec!["m3", "m4"]);
        assert_eq!(snap.message_count, 5);

        let everything = snapshot(&session, 50, now);
        assert_eq!(everything.conversation_tail.len(), 5);
    }
}
