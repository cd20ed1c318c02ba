//! Evaluation worker. Inspects the produced file and the session metadata
//! behind a validator seam (the full NWB inspector is an external library),
//! writes the validation report, and marks the session complete.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use nwbforge_common::{
    AgentKind, ExecutePayload, IssueSeverity, McpMessage, MessageKind, SessionContext, TaskAction,
    ValidationIssue, ValidationResults, ValidationStatus,
};

use crate::client::CoordinatorClient;
use crate::handler::{error_reply, success_reply, MessageHandler};
use crate::llm::LlmRunner;
use crate::workers::{failure_overlay, history_with_outcome, history_with_start};

const SUMMARY_SYSTEM: &str = "You summarize NWB validation reports for researchers. \
Two or three plain sentences: overall verdict first, then the issues that most \
need attention.";

/// Seam for the external NWB inspection library.
pub trait NwbValidator: Send + Sync {
    fn validate(&self, session: &SessionContext, nwb_path: &Path) -> Vec<ValidationIssue>;
}

/// Default validator: file integrity plus metadata best-practice checks.
pub struct BestPracticesValidator;

impl NwbValidator for BestPracticesValidator {
    fn validate(&self, session: &SessionContext, nwb_path: &Path) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let file_ok = nwb_path.is_file()
            && std::fs::metadata(nwb_path).map(|m| m.len() > 0).unwrap_or(false);
        if !file_ok {
            issues.push(ValidationIssue {
                severity: IssueSeverity::Critical,
                message: format!("NWB file missing or empty: {}", nwb_path.display()),
                location: None,
                check_name: "file_integrity".to_string(),
            });
        }

        let metadata = session.metadata.clone().unwrap_or_default();
        let mut require = |present: bool, severity: IssueSeverity, field: &str, check: &str| {
            if !present {
                issues.push(ValidationIssue {
                    severity,
                    message: format!("{field} is not documented"),
                    location: Some(format!("general/{field}")),
                    check_name: check.to_string(),
                });
            }
        };

        require(
            metadata.subject_id.is_some(),
            IssueSeverity::Critical,
            "subject_id",
            "subject_presence",
        );
        require(
            metadata.species.is_some(),
            IssueSeverity::BestPracticeViolation,
            "species",
            "species_identification",
        );
        require(
            metadata.experimenter.is_some(),
            IssueSeverity::BestPracticeViolation,
            "experimenter",
            "experimenter_present",
        );
        require(
            metadata.device_name.is_some(),
            IssueSeverity::BestPracticeViolation,
            "device_name",
            "device_documented",
        );
        require(
            metadata.session_start_time.is_some(),
            IssueSeverity::BestPracticeViolation,
            "session_start_time",
            "session_start_time_present",
        );
        require(
            metadata.description.is_some(),
            IssueSeverity::BestPracticeSuggestion,
            "description",
            "session_description",
        );
        require(
            metadata.recording_location.is_some(),
            IssueSeverity::BestPracticeSuggestion,
            "recording_location",
            "recording_location_documented",
        );

        issues
    }
}

pub struct EvaluationWorker {
    client: CoordinatorClient,
    output_base: PathBuf,
    validator: Box<dyn NwbValidator>,
    llm: Option<LlmRunner>,
}

impl EvaluationWorker {
    pub fn new(
        client: CoordinatorClient,
        output_base: impl Into<PathBuf>,
        llm: Option<LlmRunner>,
    ) -> Self {
        Self {
            client,
            output_base: output_base.into(),
            validator: Box::new(BestPracticesValidator),
            llm,
        }
    }

    pub fn with_validator(mut self, validator: Box<dyn NwbValidator>) -> Self {
        self.validator = validator;
        self
    }

    async fn validate_nwb(&self, payload: &ExecutePayload) -> Value {
        let session_id = payload.session_id.as_str();
        let agent = AgentKind::Evaluation.agent_name();

        let mut session = match self.client.get_context(session_id).await {
            Ok(session) => session,
            Err(e) => return error_reply(Some(session_id), e),
        };

        session.agent_history = history_with_start(&session, agent);
        let start = json!({
            "workflow_stage": "evaluating",
            "current_agent": agent,
            "agent_history": session.agent_history.clone(),
        });
        if let Err(e) = self.client.update_context(session_id, &start).await {
            return error_reply(Some(session_id), e);
        }

        let nwb_path = session
            .conversion_results
            .as_ref()
            .and_then(|r| r.nwb_file_path.clone())
            .or_else(|| session.output_nwb_path.clone());
        let Some(nwb_path) = nwb_path else {
            let prompt = "No converted file recorded for this session; re-run conversion via clarification.";
            let overlay = failure_overlay(&session, agent, prompt, json!({}));
            if let Err(e) = self.client.update_context(session_id, &overlay).await {
                return error_reply(Some(session_id), e);
            }
            return error_reply(Some(session_id), prompt);
        };

        let issues = self.validator.validate(&session, Path::new(&nwb_path));
        let results = build_results(&session, issues);

        let summary = match &self.llm {
            Some(llm) => {
                let prompt = format!(
                    "Summarize this validation outcome:\n{}",
                    serde_json::to_string_pretty(&results).unwrap_or_default()
                );
                match llm.call_llm(&prompt, Some(SUMMARY_SYSTEM)).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, session_id, "LLM summary failed; using generated summary");
                        plain_summary(&results)
                    }
                }
            }
            None => plain_summary(&results),
        };

        let report_path = match self.write_report(session_id, &results, &summary).await {
            Ok(path) => path,
            Err(e) => {
                let prompt = format!("Validation report could not be written: {e}");
                let overlay = failure_overlay(&session, agent, &prompt, json!({}));
                if let Err(e) = self.client.update_context(session_id, &overlay).await {
                    return error_reply(Some(session_id), e);
                }
                return error_reply(Some(session_id), prompt);
            }
        };

        let mut results = results;
        results.validation_report_path = Some(report_path.clone());
        results.llm_validation_summary = Some(summary);

        let overall = results.overall_status;
        let done = json!({
            "validation_results": results,
            "output_report_path": report_path,
            "workflow_stage": "completed",
            "current_agent": null,
            "agent_history": history_with_outcome(&session, agent, "success", None),
        });
        if let Err(e) = self.client.update_context(session_id, &done).await {
            return error_reply(Some(session_id), e);
        }

        success_reply(Some(session_id), json!({ "overall_status": overall }))
    }

    async fn write_report(
        &self,
        session_id: &str,
        results: &ValidationResults,
        summary: &str,
    ) -> anyhow::Result<String> {
        let report_dir = self.output_base.join("reports");
        tokio::fs::create_dir_all(&report_dir).await?;
        let report_path = report_dir.join(format!("{session_id}_validation.json"));

        let report = json!({
            "session_id": session_id,
            "generated_at": Utc::now(),
            "overall_status": results.overall_status,
            "issue_count": results.issue_count,
            "issues": results.issues,
            "metadata_completeness_score": results.metadata_completeness_score,
            "best_practices_score": results.best_practices_score,
            "summary": summary,
        });
        tokio::fs::write(&report_path, serde_json::to_vec_pretty(&report)?).await?;
        Ok(report_path.display().to_string())
    }
}

fn build_results(session: &SessionContext, issues: Vec<ValidationIssue>) -> ValidationResults {
    let mut issue_count: HashMap<String, u32> = HashMap::new();
    for issue in &issues {
        *issue_count.entry(issue.severity.to_string()).or_insert(0) += 1;
    }

    let criticals = issue_count.get("critical").copied().unwrap_or(0);
    let violations = issue_count.get("best_practice_violation").copied().unwrap_or(0);
    let suggestions = issue_count.get("best_practice_suggestion").copied().unwrap_or(0);

    let overall_status = if criticals > 0 {
        ValidationStatus::Failed
    } else if !issues.is_empty() {
        ValidationStatus::PassedWithWarnings
    } else {
        ValidationStatus::Passed
    };

    let completeness = session
        .metadata
        .as_ref()
        .map(|m| m.completeness())
        .unwrap_or(0.0);
    let best_practices = (1.0
        - 0.4 * f64::from(criticals)
        - 0.15 * f64::from(violations)
        - 0.05 * f64::from(suggestions))
    .max(0.0);

    ValidationResults {
        overall_status,
        issue_count,
        issues,
        metadata_completeness_score: Some(completeness),
        best_practices_score: Some(best_practices),
        validation_report_path: None,
        llm_validation_summary: None,
    }
}

fn plain_summary(results: &ValidationResults) -> String {
    let count = |key: &str| results.issue_count.get(key).copied().unwrap_or(0);
    format!(
        "Validation {}: {} critical issue(s), {} best-practice violation(s), {} suggestion(s).",
        results.overall_status,
        count("critical"),
        count("best_practice_violation"),
        count("best_practice_suggestion"),
    )
}

#[async_trait]
impl MessageHandler for EvaluationWorker {
    fn capabilities(&self) -> Vec<String> {
        vec!["validate_nwb".to_string()]
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
            TaskAction::ValidateNwb => self.validate_nwb(&payload).await,
            other => error_reply(
                Some(&payload.session_id),
                format!("evaluation agent does not handle action: {other}"),
            ),
        }
    }
}
