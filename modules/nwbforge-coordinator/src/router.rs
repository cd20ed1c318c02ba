//! Outbound message delivery. Builds one envelope per send and POSTs it to
//! the target worker's `/mcp/message` endpoint. The router never retries;
//! retry is the caller's decision.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use nwbforge_common::{
    ExecutePayload, McpMessage, MessageKind, NwbforgeError, TaskAction, COORDINATOR_NAME,
};

use crate::registry::AgentRegistry;

/// Read/write timeout for worker calls. Evaluation dispatches that produce
/// free-text summaries can exceed this; callers pass a per-call override.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MessageRouter {
    registry: Arc<AgentRegistry>,
    http: reqwest::Client,
}

impl MessageRouter {
    pub fn new(registry: Arc<AgentRegistry>) -> Result<Self, NwbforgeError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| NwbforgeError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { registry, http })
    }

    /// Send one envelope to a registered worker and return its parsed JSON
    /// reply. Exactly one POST per call, regardless of failure mode.
    ///
    /// Three distinct failures surface: unregistered target (`NotFound`),
    /// transport (`Transport`), and non-success HTTP status (`Worker`).
    pub async fn send(
        &self,
        target_agent: &str,
        message_kind: MessageKind,
        payload: Value,
    ) -> Result<Value, NwbforgeError> {
        self.send_with_timeout(target_agent, message_kind, payload, None).await
    }

    pub async fn send_with_timeout(
        &self,
        target_agent: &str,
        message_kind: MessageKind,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, NwbforgeError> {
        let record = self.registry.get(target_agent).ok_or_else(|| {
            NwbforgeError::NotFound(format!("Agent '{target_agent}' not found in registry"))
        })?;

        let session_id = payload
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let message = McpMessage::new(
            COORDINATOR_NAME,
            target_agent,
            session_id,
            message_kind,
            payload,
        );

        let url = format!("{}/mcp/message", record.base_url);
        info!(
            target = target_agent,
            kind = %message_kind,
            message_id = %message.message_id,
            "routing message"
        );

        let mut request = self.http.post(&url).json(&message);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            NwbforgeError::Transport(format!("failed to reach agent '{target_agent}': {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NwbforgeError::Worker(format!(
                "agent '{target_agent}' returned HTTP {status}: {body}"
            )));
        }

        response.json().await.map_err(|e| {
            NwbforgeError::Transport(format!("unparsable reply from agent '{target_agent}': {e}"))
        })
    }

    /// Package an `agent_execute` envelope, the common case.
    pub async fn execute_task(
        &self,
        target_agent: &str,
        action: TaskAction,
        session_id: &str,
        parameters: serde_json::Map<String, Value>,
    ) -> Result<Value, NwbforgeError> {
        let payload = ExecutePayload::new(action, session_id)
            .with_parameters(parameters)
            .to_value();
        self.send(target_agent, MessageKind::AgentExecute, payload).await
    }
}
