//! The three pipeline workers. Each owns one stage, mutates the session only
//! through the coordinator's context endpoints, and hands off to the next
//! stage through the coordinator's routing endpoint.

pub mod conversion;
pub mod evaluation;
pub mod metadata;

pub use conversion::ConversionWorker;
pub use evaluation::EvaluationWorker;
pub use metadata::MetadataWorker;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use nwbforge_common::{AgentHistoryEntry, SessionContext, TaskAction};

use crate::client::CoordinatorClient;

/// Copy of the session history with a fresh running entry appended.
pub(crate) fn history_with_start(
    session: &SessionContext,
    agent_name: &str,
) -> Vec<AgentHistoryEntry> {
    let mut history = session.agent_history.clone();
    history.push(AgentHistoryEntry {
        agent_name: agent_name.to_string(),
        started_at: Utc::now(),
        completed_at: None,
        status: "running".to_string(),
        error_message: None,
    });
    history
}

/// Copy of the session history with this agent's most recent entry closed.
pub(crate) fn history_with_outcome(
    session: &SessionContext,
    agent_name: &str,
    status: &str,
    error_message: Option<&str>,
) -> Vec<AgentHistoryEntry> {
    let mut history = session.agent_history.clone();
    if let Some(entry) = history
        .iter_mut()
        .rev()
        .find(|entry| entry.agent_name == agent_name)
    {
        entry.completed_at = Some(Utc::now());
        entry.status = status.to_string();
        entry.error_message = error_message.map(str::to_string);
    }
    history
}

/// Overlay that parks a session in FAILED behind a clarification prompt.
/// Extra fields (e.g. partially extracted metadata) ride along so the
/// operator's next attempt starts from what was recovered.
pub(crate) fn failure_overlay(
    session: &SessionContext,
    agent_name: &str,
    prompt: &str,
    extra: Value,
) -> Value {
    let mut overlay = json!({
        "workflow_stage": "failed",
        "current_agent": null,
        "requires_user_clarification": true,
        "clarification_prompt": prompt,
        "agent_history": history_with_outcome(session, agent_name, "error", Some(prompt)),
    });
    if let (Some(overlay), Value::Object(extra)) = (overlay.as_object_mut(), extra) {
        for (key, value) in extra {
            overlay.insert(key, value);
        }
    }
    overlay
}

/// Fire-and-forget handoff to the next stage. A transport failure must not
/// move the workflow stage, so it is logged and the session stays where the
/// completed stage left it.
pub(crate) fn spawn_next_dispatch(
    client: CoordinatorClient,
    target_agent: &'static str,
    action: TaskAction,
    session_id: String,
) {
    tokio::spawn(async move {
        if let Err(e) = client
            .dispatch_task(target_agent, action, &session_id, serde_json::Map::new())
            .await
        {
            warn!(
                error = %e,
                session_id = %session_id,
                target = target_agent,
                "next-stage dispatch failed; session remains at its current stage"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use nwbforge_common::{DatasetInfo, WorkflowStage};

    fn session() -> SessionContext {
        SessionContext::new(
            "s-1",
            DatasetInfo {
                dataset_path: "/data/run1".into(),
                format: "openephys".into(),
                total_size_bytes: 10,
                file_count: 1,
                channel_count: None,
                sampling_rate_hz: None,
                duration_seconds: None,
                has_metadata_files: false,
                metadata_files: vec![],
            },
        )
    }

    #[test]
    fn history_start_then_outcome_closes_the_entry() {
        let mut session = session();
        session.agent_history = history_with_start(&session, "metadata_agent");
        assert_eq!(session.agent_history.len(), 1);
        assert_eq!(session.agent_history[0].status, "running");

        let closed = history_with_outcome(&session, "metadata_agent", "success", None);
        assert_eq!(closed[0].status, "success");
        assert!(closed[0].completed_at.is_some());
    }

    #[test]
    fn failure_overlay_sets_clarification_state() {
        let mut session = session();
        let overlay = failure_overlay(&session, "metadata_agent", "need subject_id", json!({}));
        session.apply_overlay(&overlay).unwrap();

        assert_eq!(session.workflow_stage, WorkflowStage::Failed);
        assert!(session.requires_user_clarification);
        assert_eq!(session.clarification_prompt.as_deref(), Some("need subject_id"));
        assert_eq!(session.current_agent, None);
    }
}
