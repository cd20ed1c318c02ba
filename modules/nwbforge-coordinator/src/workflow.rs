//! Stage projection and the short, non-blocking dispatches that move a
//! session through the pipeline. The coordinator never recomputes stage:
//! transitions happen only through context updates persisted by workers,
//! and the last write wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use nwbforge_common::api::SessionClarifyRequest;
use nwbforge_common::{
    AgentKind, DatasetInfo, NwbforgeError, SessionContext, TaskAction, WorkflowStage,
};

use crate::context::ContextStore;
use crate::registry::AgentRegistry;
use crate::router::MessageRouter;

// --- Stage projection ---

/// Progress is a pure function of stage; FAILED sessions report 0%.
pub fn progress_percentage(stage: WorkflowStage) -> u8 {
    match stage {
        WorkflowStage::Initialized => 10,
        WorkflowStage::CollectingMetadata => 25,
        WorkflowStage::Converting => 50,
        WorkflowStage::Evaluating => 75,
        WorkflowStage::Completed => 100,
        WorkflowStage::Failed => 0,
    }
}

pub fn status_message(stage: WorkflowStage) -> &'static str {
    match stage {
        WorkflowStage::Initialized => "Session initialized. Preparing to collect metadata.",
        WorkflowStage::CollectingMetadata => "Collecting and extracting metadata from dataset.",
        WorkflowStage::Converting => "Converting dataset to NWB format.",
        WorkflowStage::Evaluating => "Validating NWB file and generating report.",
        WorkflowStage::Completed => "Conversion completed successfully.",
        WorkflowStage::Failed => "Conversion failed. Please check error details.",
    }
}

// --- Dataset inspection ---

pub fn validate_dataset_path(dataset_path: &str) -> Result<PathBuf, NwbforgeError> {
    let path = PathBuf::from(dataset_path);
    if !path.exists() {
        return Err(NwbforgeError::Validation(format!(
            "Dataset path not found: {dataset_path}"
        )));
    }
    if !path.is_dir() {
        return Err(NwbforgeError::Validation(format!(
            "Dataset path must be a directory: {dataset_path}"
        )));
    }
    Ok(path)
}

/// Surface-level scan: file count, byte total, free-text metadata files, and
/// a format tag from marker files. Channel counts and rates come later from
/// the format parser, not from this walk.
pub fn collect_dataset_info(dataset_path: &Path) -> Result<DatasetInfo, NwbforgeError> {
    let absolute = dataset_path.canonicalize().map_err(|e| {
        NwbforgeError::Validation(format!(
            "Failed to resolve dataset path {}: {e}",
            dataset_path.display()
        ))
    })?;

    let mut file_count = 0u64;
    let mut total_size_bytes = 0u64;
    let mut metadata_files = Vec::new();
    let mut saw_nwb = false;

    for entry in WalkDir::new(&absolute).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        file_count += 1;
        if let Ok(meta) = entry.metadata() {
            total_size_bytes += meta.len();
        }
        match entry.path().extension().and_then(|e| e.to_str()) {
            Some("md") => metadata_files.push(entry.path().display().to_string()),
            Some("nwb") => saw_nwb = true,
            _ => {}
        }
    }

    let format = if absolute.join("structure.oebin").is_file() {
        "openephys"
    } else if saw_nwb {
        "nwb"
    } else {
        "unknown"
    };

    Ok(DatasetInfo {
        dataset_path: absolute.display().to_string(),
        format: format.to_string(),
        total_size_bytes,
        file_count,
        channel_count: None,
        sampling_rate_hz: None,
        duration_seconds: None,
        has_metadata_files: !metadata_files.is_empty(),
        metadata_files,
    })
}

// --- Engine ---

pub struct WorkflowEngine {
    store: Arc<ContextStore>,
    registry: Arc<AgentRegistry>,
    router: Arc<MessageRouter>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<ContextStore>,
        registry: Arc<AgentRegistry>,
        router: Arc<MessageRouter>,
    ) -> Self {
        Self { store, registry, router }
    }

    /// Create a session and hand it to the metadata worker. The session is
    /// persisted before dispatch, so a dispatch failure leaves a retrievable
    /// INITIALIZED session behind.
    pub async fn initialize_session(
        &self,
        dataset_path: &str,
    ) -> Result<SessionContext, NwbforgeError> {
        let path = validate_dataset_path(dataset_path)?;
        let session_id = Uuid::new_v4().to_string();
        let dataset_info = collect_dataset_info(&path)?;

        info!(
            session_id = %session_id,
            format = %dataset_info.format,
            files = dataset_info.file_count,
            "initializing session"
        );

        let session = SessionContext::new(session_id.clone(), dataset_info.clone());
        self.store.create(&session).await?;

        let metadata_agent = AgentKind::Metadata.agent_name();
        if self.registry.get(metadata_agent).is_none() {
            return Err(NwbforgeError::Transport(format!(
                "{metadata_agent} is not registered with the coordinator"
            )));
        }

        let mut parameters = serde_json::Map::new();
        parameters.insert("dataset_path".to_string(), Value::String(dataset_info.dataset_path));
        let reply = self
            .dispatch(metadata_agent, TaskAction::InitializeSession, &session_id, parameters)
            .await?;
        log_worker_reply(metadata_agent, &session_id, &reply);

        Ok(session)
    }

    /// Forward operator input to the metadata worker. The worker owns the
    /// merge into `metadata` and re-triggers conversion; the coordinator does
    /// not mutate metadata here.
    pub async fn submit_clarification(
        &self,
        session_id: &str,
        request: &SessionClarifyRequest,
    ) -> Result<SessionContext, NwbforgeError> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| NwbforgeError::NotFound(format!("Session {session_id} not found")))?;

        let mut parameters = serde_json::Map::new();
        if let Some(user_input) = &request.user_input {
            parameters.insert("user_input".to_string(), Value::String(user_input.clone()));
        }
        if let Some(updated) = &request.updated_metadata {
            parameters.insert(
                "updated_metadata".to_string(),
                serde_json::to_value(updated).expect("string map serializes"),
            );
        }

        let metadata_agent = AgentKind::Metadata.agent_name();
        let reply = self
            .dispatch(metadata_agent, TaskAction::HandleClarification, session_id, parameters)
            .await?;
        log_worker_reply(metadata_agent, session_id, &reply);

        Ok(session)
    }

    /// Dispatch with the unregistered-target case folded into Transport:
    /// from the caller's view a missing worker and an unreachable worker are
    /// the same 5xx, while NotFound stays reserved for unknown sessions.
    async fn dispatch(
        &self,
        target: &str,
        action: TaskAction,
        session_id: &str,
        parameters: serde_json::Map<String, Value>,
    ) -> Result<Value, NwbforgeError> {
        self.router
            .execute_task(target, action, session_id, parameters)
            .await
            .map_err(|e| match e {
                NwbforgeError::NotFound(msg) => NwbforgeError::Transport(msg),
                other => other,
            })
    }
}

/// Workers that fail mid-task reply `{"status":"error"}` after writing the
/// clarification state themselves; the coordinator propagates via status
/// polling rather than failing the originating request.
fn log_worker_reply(agent: &str, session_id: &str, reply: &Value) {
    match reply.get("status").and_then(Value::as_str) {
        Some("error") => warn!(
            agent,
            session_id,
            message = reply.get("message").and_then(serde_json::Value::as_str).unwrap_or(""),
            "worker reported an error; session carries the clarification state"
        ),
        _ => info!(agent, session_id, "worker accepted task"),
    }
}
