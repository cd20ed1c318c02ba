use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NwbforgeError;

// --- Workflow stage ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Initialized,
    CollectingMetadata,
    Converting,
    Evaluating,
    Completed,
    Failed,
}

impl WorkflowStage {
    /// True for stages from which no further transition happens on its own.
    /// FAILED is terminal-or-recoverable: a clarification re-enters CONVERTING.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStage::Completed | WorkflowStage::Failed)
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStage::Initialized => write!(f, "initialized"),
            WorkflowStage::CollectingMetadata => write!(f, "collecting_metadata"),
            WorkflowStage::Converting => write!(f, "converting"),
            WorkflowStage::Evaluating => write!(f, "evaluating"),
            WorkflowStage::Completed => write!(f, "completed"),
            WorkflowStage::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for WorkflowStage {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(Self::Initialized),
            "collecting_metadata" => Ok(Self::CollectingMetadata),
            "converting" => Ok(Self::Converting),
            "evaluating" => Ok(Self::Evaluating),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown WorkflowStage: {other}")),
        }
    }
}

// --- Extraction confidence ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceLevel::High => write!(f, "high"),
            ConfidenceLevel::Medium => write!(f, "medium"),
            ConfidenceLevel::Low => write!(f, "low"),
        }
    }
}

// --- Validation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed,
    PassedWithWarnings,
    Failed,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationStatus::Passed => write!(f, "passed"),
            ValidationStatus::PassedWithWarnings => write!(f, "passed_with_warnings"),
            ValidationStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    BestPracticeViolation,
    BestPracticeSuggestion,
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueSeverity::Critical => write!(f, "critical"),
            IssueSeverity::BestPracticeViolation => write!(f, "best_practice_violation"),
            IssueSeverity::BestPracticeSuggestion => write!(f, "best_practice_suggestion"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub check_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResults {
    pub overall_status: ValidationStatus,
    #[serde(default)]
    pub issue_count: HashMap<String, u32>,
    #[serde(default)]
    pub issues: Vec<ValidationIssue>,
    #[serde(default)]
    pub metadata_completeness_score: Option<f64>,
    #[serde(default)]
    pub best_practices_score: Option<f64>,
    #[serde(default)]
    pub validation_report_path: Option<String>,
    #[serde(default)]
    pub llm_validation_summary: Option<String>,
}

// --- Dataset ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub dataset_path: String,
    pub format: String,
    pub total_size_bytes: u64,
    pub file_count: u64,
    #[serde(default)]
    pub channel_count: Option<u32>,
    #[serde(default)]
    pub sampling_rate_hz: Option<f64>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub has_metadata_files: bool,
    #[serde(default)]
    pub metadata_files: Vec<String>,
}

// --- Metadata extraction ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataExtractionResult {
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub session_start_time: Option<String>,
    #[serde(default)]
    pub experimenter: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub recording_location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub extraction_confidence: HashMap<String, ConfidenceLevel>,
    #[serde(default)]
    pub llm_extraction_log: Option<String>,
}

impl MetadataExtractionResult {
    /// Set a metadata field by its wire name. Returns false for unknown names
    /// so callers can log rather than silently drop operator input.
    pub fn set_field(&mut self, name: &str, value: &str) -> bool {
        let slot = match name {
            "subject_id" => &mut self.subject_id,
            "species" => &mut self.species,
            "age" => &mut self.age,
            "sex" => &mut self.sex,
            "session_start_time" => &mut self.session_start_time,
            "experimenter" => &mut self.experimenter,
            "device_name" => &mut self.device_name,
            "manufacturer" => &mut self.manufacturer,
            "recording_location" => &mut self.recording_location,
            "description" => &mut self.description,
            _ => return false,
        };
        *slot = Some(value.to_string());
        true
    }

    /// Fraction of the ten metadata fields that are filled, 0.0..=1.0.
    pub fn completeness(&self) -> f64 {
        let filled = [
            &self.subject_id,
            &self.species,
            &self.age,
            &self.sex,
            &self.session_start_time,
            &self.experimenter,
            &self.device_name,
            &self.manufacturer,
            &self.recording_location,
            &self.description,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count();
        filled as f64 / 10.0
    }
}

// --- Conversion ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionResults {
    #[serde(default)]
    pub nwb_file_path: Option<String>,
    #[serde(default)]
    pub conversion_duration_seconds: Option<f64>,
    #[serde(default)]
    pub conversion_warnings: Vec<String>,
    #[serde(default)]
    pub conversion_errors: Vec<String>,
    #[serde(default)]
    pub conversion_log: Option<String>,
}

// --- Agent history ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHistoryEntry {
    pub agent_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
}

// --- Session aggregate ---

/// The root aggregate for one end-to-end conversion request. Owned
/// exclusively by the coordinator's context store; workers mutate it only
/// through the internal context endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub workflow_stage: WorkflowStage,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub current_agent: Option<String>,
    #[serde(default)]
    pub agent_history: Vec<AgentHistoryEntry>,
    #[serde(default)]
    pub dataset_info: Option<DatasetInfo>,
    #[serde(default)]
    pub metadata: Option<MetadataExtractionResult>,
    #[serde(default)]
    pub conversion_results: Option<ConversionResults>,
    #[serde(default)]
    pub validation_results: Option<ValidationResults>,
    #[serde(default)]
    pub requires_user_clarification: bool,
    #[serde(default)]
    pub clarification_prompt: Option<String>,
    #[serde(default)]
    pub output_nwb_path: Option<String>,
    #[serde(default)]
    pub output_report_path: Option<String>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, dataset_info: DatasetInfo) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            workflow_stage: WorkflowStage::Initialized,
            created_at: now,
            last_updated: now,
            current_agent: None,
            agent_history: Vec::new(),
            dataset_info: Some(dataset_info),
            metadata: None,
            conversion_results: None,
            validation_results: None,
            requires_user_clarification: false,
            clarification_prompt: None,
            output_nwb_path: None,
            output_report_path: None,
        }
    }

    /// Apply a partial overlay: top-level fields present in `overlay` replace
    /// the current values wholesale (nested objects are not deep-merged).
    /// `session_id` and `created_at` are immutable and cannot be overlaid.
    /// Refreshes `last_updated` to now.
    pub fn apply_overlay(&mut self, overlay: &serde_json::Value) -> Result<(), NwbforgeError> {
        let overlay = overlay
            .as_object()
            .ok_or_else(|| NwbforgeError::Validation("context overlay must be a JSON object".into()))?;

        let mut current = serde_json::to_value(&*self)
            .map_err(|e| NwbforgeError::Storage(format!("failed to serialize session: {e}")))?;
        let fields = current
            .as_object_mut()
            .expect("SessionContext serializes to an object");

        for (key, value) in overlay {
            if key == "session_id" || key == "created_at" {
                continue;
            }
            fields.insert(key.clone(), value.clone());
        }

        let mut updated: SessionContext = serde_json::from_value(current)
            .map_err(|e| NwbforgeError::Validation(format!("invalid context overlay: {e}")))?;
        updated.last_updated = Utc::now();
        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset() -> DatasetInfo {
        DatasetInfo {
            dataset_path: "/data/run1".into(),
            format: "openephys".into(),
            total_size_bytes: 1024,
            file_count: 3,
            channel_count: None,
            sampling_rate_hz: None,
            duration_seconds: None,
            has_metadata_files: true,
            metadata_files: vec!["/data/run1/notes.md".into()],
        }
    }

    #[test]
    fn stage_round_trips_through_str() {
        for stage in [
            WorkflowStage::Initialized,
            WorkflowStage::CollectingMetadata,
            WorkflowStage::Converting,
            WorkflowStage::Evaluating,
            WorkflowStage::Completed,
            WorkflowStage::Failed,
        ] {
            let parsed: WorkflowStage = stage.to_string().parse().expect("parses");
            assert_eq!(stage, parsed);
        }
        assert!("midway".parse::<WorkflowStage>().is_err());
    }

    #[test]
    fn stage_serde_uses_snake_case() {
        let v = serde_json::to_value(WorkflowStage::CollectingMetadata).unwrap();
        assert_eq!(v, json!("collecting_metadata"));
    }

    #[test]
    fn overlay_replaces_fields_and_advances_last_updated() {
        let mut session = SessionContext::new("s-1", dataset());
        let before = session.last_updated;

        session
            .apply_overlay(&json!({
                "workflow_stage": "collecting_metadata",
                "current_agent": "metadata_agent",
            }))
            .expect("overlay applies");

        assert_eq!(session.workflow_stage, WorkflowStage::CollectingMetadata);
        assert_eq!(session.current_agent.as_deref(), Some("metadata_agent"));
        assert!(session.last_updated >= before);
        // Untouched fields survive
        assert!(session.dataset_info.is_some());
    }

    #[test]
    fn overlay_replaces_nested_objects_wholesale() {
        let mut session = SessionContext::new("s-2", dataset());
        session
            .apply_overlay(&json!({
                "metadata": {"subject_id": "mouse_001", "species": "Mus musculus"}
            }))
            .unwrap();

        // Overlaying metadata again with only one field drops the other:
        // nested objects are replaced, never deep-merged.
        session
            .apply_overlay(&json!({"metadata": {"subject_id": "mouse_002"}}))
            .unwrap();

        let metadata = session.metadata.expect("metadata present");
        assert_eq!(metadata.subject_id.as_deref(), Some("mouse_002"));
        assert_eq!(metadata.species, None);
    }

    #[test]
    fn overlay_cannot_change_identity_fields() {
        let mut session = SessionContext::new("s-3", dataset());
        let created = session.created_at;
        session
            .apply_overlay(&json!({"session_id": "hijacked", "created_at": "2001-01-01T00:00:00Z"}))
            .unwrap();
        assert_eq!(session.session_id, "s-3");
        assert_eq!(session.created_at, created);
    }

    #[test]
    fn overlay_rejects_non_object() {
        let mut session = SessionContext::new("s-4", dataset());
        let err = session.apply_overlay(&json!(["not", "an", "object"])).unwrap_err();
        assert!(matches!(err, NwbforgeError::Validation(_)));
    }

    #[test]
    fn overlay_rejects_bad_field_value() {
        let mut session = SessionContext::new("s-5", dataset());
        let err = session
            .apply_overlay(&json!({"workflow_stage": "warp_speed"}))
            .unwrap_err();
        assert!(matches!(err, NwbforgeError::Validation(_)));
    }

    #[test]
    fn set_field_accepts_known_names_only() {
        let mut m = MetadataExtractionResult::default();
        assert!(m.set_field("subject_id", "mouse_001"));
        assert!(m.set_field("species", "Mus musculus"));
        assert!(!m.set_field("favorite_color", "teal"));
        assert_eq!(m.subject_id.as_deref(), Some("mouse_001"));
    }

    #[test]
    fn completeness_counts_filled_fields() {
        let mut m = MetadataExtractionResult::default();
        assert_eq!(m.completeness(), 0.0);
        m.set_field("subject_id", "mouse_001");
        m.set_field("species", "Mus musculus");
        assert!((m.completeness() - 0.2).abs() < f64::EPSILON);
    }
}
