//! Request/response bodies for the public and internal REST surfaces.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::MessageKind;
use crate::session::{ValidationIssue, ValidationStatus, WorkflowStage};

// --- Public session endpoints ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInitializeRequest {
    pub dataset_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInitializeResponse {
    pub session_id: String,
    pub workflow_stage: WorkflowStage,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub workflow_stage: WorkflowStage,
    pub progress_percentage: u8,
    pub status_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_agent: Option<String>,
    pub requires_clarification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionClarifyRequest {
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default)]
    pub updated_metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClarifyResponse {
    pub message: String,
    pub workflow_stage: WorkflowStage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResultResponse {
    pub session_id: String,
    pub nwb_file_path: String,
    pub validation_report_path: String,
    pub overall_status: ValidationStatus,
    pub llm_validation_summary: String,
    #[serde(default)]
    pub validation_issues: Vec<ValidationIssue>,
}

// --- Health ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(default)]
    pub agents_registered: Vec<String>,
    pub cache_connected: bool,
}

// --- Internal endpoints ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteMessageRequest {
    pub target_agent: String,
    pub message_kind: MessageKind,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgentResponse {
    pub status: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextUpdateResponse {
    pub status: String,
    pub session_id: String,
}
