//! Metadata extraction worker. Reads the dataset's free-text metadata files,
//! extracts structured fields (heuristics first, LLM when configured), and
//! either hands off to conversion or parks the session behind a
//! clarification prompt. Also the single entry point for operator
//! clarifications.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use nwbforge_common::{
    AgentKind, ConfidenceLevel, ExecutePayload, McpMessage, MessageKind, MetadataExtractionResult,
    TaskAction,
};

use crate::client::CoordinatorClient;
use crate::handler::{error_reply, success_reply, MessageHandler};
use crate::llm::LlmRunner;
use crate::workers::{failure_overlay, history_with_outcome, history_with_start, spawn_next_dispatch};

const EXTRACTION_SYSTEM: &str = "You extract experimental metadata from lab notes. \
Reply with one `field: value` line per extracted field, using the field names \
subject_id, species, age, sex, session_start_time, experimenter, device_name, \
manufacturer, recording_location, description. Omit fields you cannot find.";

pub struct MetadataWorker {
    client: CoordinatorClient,
    llm: Option<LlmRunner>,
}

impl MetadataWorker {
    pub fn new(client: CoordinatorClient, llm: Option<LlmRunner>) -> Self {
        Self { client, llm }
    }

    async fn initialize_session(&self, payload: &ExecutePayload) -> Value {
        let session_id = payload.session_id.as_str();
        let agent = AgentKind::Metadata.agent_name();

        let mut session = match self.client.get_context(session_id).await {
            Ok(session) => session,
            Err(e) => return error_reply(Some(session_id), e),
        };

        session.agent_history = history_with_start(&session, agent);
        let start = json!({
            "workflow_stage": "collecting_metadata",
            "current_agent": agent,
            "agent_history": session.agent_history.clone(),
        });
        if let Err(e) = self.client.update_context(session_id, &start).await {
            return error_reply(Some(session_id), e);
        }

        let Some(dataset) = session.dataset_info.clone() else {
            let prompt = "Session has no dataset information; re-initialize with a valid dataset path.";
            let overlay = failure_overlay(&session, agent, prompt, json!({}));
            if let Err(e) = self.client.update_context(session_id, &overlay).await {
                return error_reply(Some(session_id), e);
            }
            return error_reply(Some(session_id), prompt);
        };

        // Heuristic pass over the free-text metadata files.
        let mut metadata = MetadataExtractionResult::default();
        let mut extracted = 0u32;
        let mut file_texts = Vec::new();
        for file in &dataset.metadata_files {
            match tokio::fs::read_to_string(file).await {
                Ok(text) => {
                    extracted += parse_free_text(&text, &mut metadata);
                    file_texts.push(text);
                }
                Err(e) => warn!(error = %e, file = %file, "failed to read metadata file"),
            }
        }

        // LLM pass when the heuristics left the subject unresolved and there
        // is free text to work from.
        if metadata.subject_id.is_none() && !file_texts.is_empty() {
            if let Some(llm) = &self.llm {
                let prompt = format!(
                    "Extract metadata from these lab notes:\n\n{}",
                    file_texts.join("\n---\n")
                );
                match llm.call_llm(&prompt, Some(EXTRACTION_SYSTEM)).await {
                    Ok(reply) => {
                        extracted += parse_free_text(&reply, &mut metadata);
                        metadata.llm_extraction_log = Some(reply);
                    }
                    Err(e) => {
                        warn!(error = %e, session_id, "LLM extraction failed; continuing with heuristics");
                        metadata.llm_extraction_log = Some(format!("extraction failed: {e}"));
                    }
                }
            }
        }

        if metadata.subject_id.is_none() {
            let prompt = "Could not determine subject_id from the dataset. Submit it via \
                          clarification, e.g. updated_metadata = {\"subject_id\": \"mouse_001\"}.";
            let overlay = failure_overlay(&session, agent, prompt, json!({ "metadata": metadata }));
            if let Err(e) = self.client.update_context(session_id, &overlay).await {
                return error_reply(Some(session_id), e);
            }
            return error_reply(Some(session_id), prompt);
        }

        let done = json!({
            "metadata": metadata,
            "current_agent": null,
            "agent_history": history_with_outcome(&session, agent, "success", None),
        });
        if let Err(e) = self.client.update_context(session_id, &done).await {
            return error_reply(Some(session_id), e);
        }

        spawn_next_dispatch(
            self.client.clone(),
            AgentKind::Conversion.agent_name(),
            TaskAction::ConvertDataset,
            session_id.to_string(),
        );

        success_reply(Some(session_id), json!({ "fields_extracted": extracted }))
    }

    async fn handle_clarification(&self, payload: &ExecutePayload) -> Value {
        let session_id = payload.session_id.as_str();
        let agent = AgentKind::Metadata.agent_name();

        let mut session = match self.client.get_context(session_id).await {
            Ok(session) => session,
            Err(e) => return error_reply(Some(session_id), e),
        };
        session.agent_history = history_with_start(&session, agent);

        let mut metadata = session.metadata.clone().unwrap_or_default();
        let mut applied = 0u32;

        if let Some(Value::Object(updated)) = payload.parameters.get("updated_metadata") {
            for (field, value) in updated {
                let Some(value) = value.as_str() else { continue };
                if metadata.set_field(field, value) {
                    metadata
                        .extraction_confidence
                        .insert(field.clone(), ConfidenceLevel::High);
                    applied += 1;
                } else {
                    warn!(field = %field, session_id, "ignoring unknown metadata field in clarification");
                }
            }
        }

        if let Some(user_input) = payload.param_str("user_input") {
            applied += parse_free_text(user_input, &mut metadata);
            let log = match metadata.llm_extraction_log.take() {
                Some(prior) => format!("{prior}\nclarification: {user_input}"),
                None => format!("clarification: {user_input}"),
            };
            metadata.llm_extraction_log = Some(log);
        }

        let overlay = json!({
            "metadata": metadata,
            "requires_user_clarification": false,
            "clarification_prompt": null,
            "workflow_stage": "converting",
            "current_agent": null,
            "agent_history": history_with_outcome(&session, agent, "success", None),
        });
        if let Err(e) = self.client.update_context(session_id, &overlay).await {
            return error_reply(Some(session_id), e);
        }

        spawn_next_dispatch(
            self.client.clone(),
            AgentKind::Conversion.agent_name(),
            TaskAction::ConvertDataset,
            session_id.to_string(),
        );

        success_reply(Some(session_id), json!({ "fields_applied": applied }))
    }
}

#[async_trait]
impl MessageHandler for MetadataWorker {
    fn capabilities(&self) -> Vec<String> {
        vec!["initialize_session".to_string(), "handle_clarification".to_string()]
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
            TaskAction::InitializeSession => self.initialize_session(&payload).await,
            TaskAction::HandleClarification => self.handle_clarification(&payload).await,
            other => error_reply(
                Some(&payload.session_id),
                format!("metadata agent does not handle action: {other}"),
            ),
        }
    }
}

/// Parse `key: value` lines from free text into metadata fields. Markdown
/// bullets and bold markers are stripped; aliased keys land with medium
/// confidence, exact field names with high.
fn parse_free_text(text: &str, metadata: &mut MetadataExtractionResult) -> u32 {
    let mut extracted = 0;
    for line in text.lines() {
        let line = line.trim().trim_start_matches(['-', '*', '#', ' ']).replace("**", "");
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase().replace([' ', '-'], "_");
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let field = match key.as_str() {
            "subject" | "subject_id" | "animal" | "animal_id" => "subject_id",
            "species" => "species",
            "age" => "age",
            "sex" => "sex",
            "session_start_time" | "session_start" | "start_time" | "date" => "session_start_time",
            "experimenter" | "researcher" => "experimenter",
            "device_name" | "device" | "probe" => "device_name",
            "manufacturer" => "manufacturer",
            "recording_location" | "location" | "brain_region" | "region" => "recording_location",
            "description" | "notes" => "description",
            _ => continue,
        };
        if metadata.set_field(field, value) {
            let confidence = if key == field {
                ConfidenceLevel::High
            } else {
                ConfidenceLevel::Medium
            };
            metadata.extraction_confidence.insert(field.to_string(), confidence);
            extracted += 1;
        }
    }
    extracted
}
