//! HTTP client for the coordinator's internal API. Every worker embeds one:
//! self-registration on boot, session context reads and overlay writes, and
//! next-stage dispatch through the coordinator (workers never talk to each
//! other directly).

use std::time::Duration;

use serde_json::Value;
use tracing::info;

use nwbforge_common::api::RouteMessageRequest;
use nwbforge_common::{
    AgentRecord, ExecutePayload, MessageKind, NwbforgeError, SessionContext, TaskAction,
};

/// Generous read timeout: a routed evaluation dispatch can sit behind an
/// LLM summary that takes minutes.
const READ_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct CoordinatorClient {
    base_url: String,
    http: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, NwbforgeError> {
        let http = reqwest::Client::builder()
            .timeout(READ_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| NwbforgeError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Self-register with the coordinator. A failure here aborts worker
    /// startup; an unregistered worker would never receive work.
    pub async fn register(&self, record: &AgentRecord) -> Result<Value, NwbforgeError> {
        let url = format!("{}/internal/register_agent", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(record)
            .send()
            .await
            .map_err(|e| NwbforgeError::Transport(format!("registration request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NwbforgeError::Transport(format!(
                "coordinator rejected registration with HTTP {status}: {body}"
            )));
        }
        info!(name = %record.name, "registered with coordinator");
        response
            .json()
            .await
            .map_err(|e| NwbforgeError::Transport(format!("unparsable registration reply: {e}")))
    }

    pub async fn get_context(&self, session_id: &str) -> Result<SessionContext, NwbforgeError> {
        let url = format!("{}/internal/sessions/{session_id}/context", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| NwbforgeError::Transport(format!("context read failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(NwbforgeError::NotFound(format!("Session {session_id} not found")));
        }
        if !status.is_success() {
            return Err(NwbforgeError::Transport(format!(
                "context read returned HTTP {status}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| NwbforgeError::Transport(format!("unparsable session context: {e}")))
    }

    /// PATCH a partial overlay into the session. Overlays are idempotent, so
    /// a worker finishing after the coordinator gave up does no harm.
    pub async fn update_context(
        &self,
        session_id: &str,
        overlay: &Value,
    ) -> Result<(), NwbforgeError> {
        let url = format!("{}/internal/sessions/{session_id}/context", self.base_url);
        let response = self
            .http
            .patch(&url)
            .json(overlay)
            .send()
            .await
            .map_err(|e| NwbforgeError::Transport(format!("context update failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(NwbforgeError::NotFound(format!("Session {session_id} not found")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NwbforgeError::Transport(format!(
                "context update returned HTTP {status}: {body}"
            )));
        }
        Ok(())
    }

    /// Ask the coordinator to deliver a task to another worker.
    pub async fn dispatch_task(
        &self,
        target_agent: &str,
        action: TaskAction,
        session_id: &str,
        parameters: serde_json::Map<String, Value>,
    ) -> Result<Value, NwbforgeError> {
        let request = RouteMessageRequest {
            target_agent: target_agent.to_string(),
            message_kind: MessageKind::AgentExecute,
            payload: ExecutePayload::new(action, session_id)
                .with_parameters(parameters)
                .to_value(),
        };

        let url = format!("{}/internal/route_message", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| NwbforgeError::Transport(format!("dispatch to '{target_agent}' failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NwbforgeError::Transport(format!(
                "dispatch to '{target_agent}' returned HTTP {status}: {body}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| NwbforgeError::Transport(format!("unparsable dispatch reply: {e}")))
    }
}
