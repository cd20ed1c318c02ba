use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::NwbforgeError;

/// Source name the coordinator stamps on envelopes it originates.
pub const COORDINATOR_NAME: &str = "coordinator";

// --- Agent identity ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Metadata,
    Conversion,
    Evaluation,
}

impl AgentKind {
    /// Canonical registry name for the single worker of this kind.
    pub fn agent_name(self) -> &'static str {
        match self {
            AgentKind::Metadata => "metadata_agent",
            AgentKind::Conversion => "conversion_agent",
            AgentKind::Evaluation => "evaluation_agent",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentKind::Metadata => write!(f, "metadata"),
            AgentKind::Conversion => write!(f, "conversion"),
            AgentKind::Evaluation => write!(f, "evaluation"),
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "metadata" => Ok(Self::Metadata),
            "conversion" => Ok(Self::Conversion),
            "evaluation" => Ok(Self::Evaluation),
            other => Err(format!("unknown AgentKind: {other}")),
        }
    }
}

/// Registry entry for a live worker. Never persisted; rebuilt from worker
/// self-registration after a coordinator restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub name: String,
    pub kind: AgentKind,
    pub base_url: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

// --- Message envelope ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    AgentRegister,
    AgentExecute,
    AgentResponse,
    ContextUpdate,
    Error,
    HealthCheck,
    HealthResponse,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::AgentRegister => write!(f, "agent_register"),
            MessageKind::AgentExecute => write!(f, "agent_execute"),
            MessageKind::AgentResponse => write!(f, "agent_response"),
            MessageKind::ContextUpdate => write!(f, "context_update"),
            MessageKind::Error => write!(f, "error"),
            MessageKind::HealthCheck => write!(f, "health_check"),
            MessageKind::HealthResponse => write!(f, "health_response"),
        }
    }
}

/// The wire envelope exchanged on `POST /mcp/message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpMessage {
    pub message_id: String,
    pub source_agent: String,
    pub target_agent: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub message_kind: MessageKind,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl McpMessage {
    /// Build an envelope with a fresh message id and the current timestamp.
    pub fn new(
        source_agent: impl Into<String>,
        target_agent: impl Into<String>,
        session_id: Option<String>,
        message_kind: MessageKind,
        payload: Value,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            source_agent: source_agent.into(),
            target_agent: target_agent.into(),
            session_id,
            message_kind,
            payload,
            timestamp: Utc::now(),
        }
    }
}

// --- Execute payload ---

/// Closed set of task actions an `agent_execute` envelope may carry. Unknown
/// actions fail to parse rather than being silently accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    InitializeSession,
    HandleClarification,
    ConvertDataset,
    ValidateNwb,
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskAction::InitializeSession => write!(f, "initialize_session"),
            TaskAction::HandleClarification => write!(f, "handle_clarification"),
            TaskAction::ConvertDataset => write!(f, "convert_dataset"),
            TaskAction::ValidateNwb => write!(f, "validate_nwb"),
        }
    }
}

/// Typed view of an `agent_execute` payload: the action, the session it
/// applies to, and whatever task-specific parameters ride along.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutePayload {
    pub action: TaskAction,
    pub session_id: String,
    #[serde(flatten)]
    pub parameters: serde_json::Map<String, Value>,
}

impl ExecutePayload {
    pub fn new(action: TaskAction, session_id: impl Into<String>) -> Self {
        Self {
            action,
            session_id: session_id.into(),
            parameters: serde_json::Map::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Parse an envelope payload, rejecting unknown actions and missing
    /// session ids with a validation error.
    pub fn from_value(payload: &Value) -> Result<Self, NwbforgeError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| NwbforgeError::Validation(format!("invalid execute payload: {e}")))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("ExecutePayload serializes to an object")
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(Value::as_str)
    }
}
