//! Conversion worker. Runs the format conversion behind a backend seam (the
//! real NWB writer is an external library), records the produced file on the
//! session, and hands off to evaluation.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use nwbforge_common::{
    AgentKind, ConversionResults, ExecutePayload, McpMessage, MessageKind, SessionContext,
    TaskAction,
};

use crate::client::CoordinatorClient;
use crate::handler::{error_reply, success_reply, MessageHandler};
use crate::workers::{failure_overlay, history_with_outcome, history_with_start, spawn_next_dispatch};

/// Seam for the external format-conversion library.
#[async_trait]
pub trait ConversionBackend: Send + Sync {
    async fn convert(
        &self,
        session: &SessionContext,
        output_path: &Path,
    ) -> anyhow::Result<ConversionResults>;
}

/// Default backend: writes a self-describing NWB-style snapshot of the
/// extracted metadata and source statistics. Stands in for the external
/// writer so the pipeline runs end to end without it.
pub struct SnapshotConverter;

#[async_trait]
impl ConversionBackend for SnapshotConverter {
    async fn convert(
        &self,
        session: &SessionContext,
        output_path: &Path,
    ) -> anyhow::Result<ConversionResults> {
        let started = Instant::now();
        let dataset = session
            .dataset_info
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("session has no dataset information"))?;
        let metadata = session
            .metadata
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("metadata extraction has not completed"))?;

        let mut warnings = Vec::new();
        if dataset.format == "unknown" {
            warnings.push(
                "source format unknown; converted without format-specific interpretation"
                    .to_string(),
            );
        }

        let body = json!({
            "session_id": session.session_id,
            "general": metadata,
            "source": {
                "dataset_path": dataset.dataset_path,
                "format": dataset.format,
                "file_count": dataset.file_count,
                "total_size_bytes": dataset.total_size_bytes,
            },
        });
        let bytes = serde_json::to_vec_pretty(&body)?;
        tokio::fs::write(output_path, &bytes).await?;

        Ok(ConversionResults {
            nwb_file_path: Some(output_path.display().to_string()),
            conversion_duration_seconds: Some(started.elapsed().as_secs_f64()),
            conversion_warnings: warnings,
            conversion_errors: Vec::new(),
            conversion_log: Some(format!(
                "converted {} source files ({} bytes) from {}",
                dataset.file_count, dataset.total_size_bytes, dataset.format
            )),
        })
    }
}

pub struct ConversionWorker {
    client: CoordinatorClient,
    output_base: PathBuf,
    backend: Box<dyn ConversionBackend>,
}

impl ConversionWorker {
    pub fn new(client: CoordinatorClient, output_base: impl Into<PathBuf>) -> Self {
        Self {
            client,
            output_base: output_base.into(),
            backend: Box::new(SnapshotConverter),
        }
    }

    pub fn with_backend(mut self, backend: Box<dyn ConversionBackend>) -> Self {
        self.backend = backend;
        self
    }

    async fn convert_dataset(&self, payload: &ExecutePayload) -> Value {
        let session_id = payload.session_id.as_str();
        let agent = AgentKind::Conversion.agent_name();

        let mut session = match self.client.get_context(session_id).await {
            Ok(session) => session,
            Err(e) => return error_reply(Some(session_id), e),
        };

        session.agent_history = history_with_start(&session, agent);
        let start = json!({
            "workflow_stage": "converting",
            "current_agent": agent,
            "agent_history": session.agent_history.clone(),
        });
        if let Err(e) = self.client.update_context(session_id, &start).await {
            return error_reply(Some(session_id), e);
        }

        let output_dir = self.output_base.join("nwb_files");
        if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
            let prompt = format!("Conversion failed: could not create output directory: {e}");
            return self.fail(&session, session_id, agent, &prompt).await;
        }
        let output_path = output_dir.join(format!("{session_id}.nwb"));

        match self.backend.convert(&session, &output_path).await {
            Ok(results) => {
                let nwb_path = results.nwb_file_path.clone().unwrap_or_default();
                let done = json!({
                    "conversion_results": results,
                    "output_nwb_path": nwb_path,
                    "current_agent": null,
                    "agent_history": history_with_outcome(&session, agent, "success", None),
                });
                if let Err(e) = self.client.update_context(session_id, &done).await {
                    return error_reply(Some(session_id), e);
                }

                spawn_next_dispatch(
                    self.client.clone(),
                    AgentKind::Evaluation.agent_name(),
                    TaskAction::ValidateNwb,
                    session_id.to_string(),
                );

                success_reply(Some(session_id), json!({ "nwb_file_path": nwb_path }))
            }
            Err(e) => {
                let prompt = format!(
                    "Conversion failed: {e}. Correct the metadata via clarification to retry."
                );
                self.fail(&session, session_id, agent, &prompt).await
            }
        }
    }

    async fn fail(
        &self,
        session: &SessionContext,
        session_id: &str,
        agent: &str,
        prompt: &str,
    ) -> Value {
        let overlay = failure_overlay(session, agent, prompt, json!({}));
        if let Err(e) = self.client.update_context(session_id, &overlay).await {
            return error_reply(Some(session_id), e);
        }
        error_reply(Some(session_id), prompt)
    }
}

#[async_trait]
impl MessageHandler for ConversionWorker {
    fn capabilities(&self) -> Vec<String> {
        vec!["convert_dataset".to_string()]
    }

    async fn handle(&self, message: McpMessage) -> Value {
        if message.message_kind != MessageKind::AgentExecute {
            return error_reply(
                message.session_id.as_deref(),
                format!("unsupported message kind: {}", message.message_kind),
            );
        }
        let payload = match ExecutePayload::from_value(&message.payload) {
            Ok(payload) => payload,
            Err(e) => return error_reply(message.session_id.as_deref(), e),
        };
        match payload.action {
            TaskAction::ConvertDataset => self.convert_dataset(&payload).await,
            other => error_reply(
                Some(&payload.session_id),
                format!("conversion agent does not handle action: {other}"),
            ),
        }
    }
}
