use crate::apply::{EffectMap, ResourceDraft};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub base_url: String,
    pub route_prefix: String,
    pub run_id: String,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub database_id: Option<String>,
    #[serde(default)]
    pub database_label: Option<String>,
    #[serde(default)]
    pub form_id: Option<String>,
    /// When set, the catalog phases are skipped and the job is submitted
    /// directly (the pre-resolved "download button" flow).
    #[serde(default)]
    pub form_label: Option<String>,
    pub format: ExportFormat,
    pub rest_forms: bool,
    #[serde(default)]
    pub job_status_template: Option<String>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub job_timeout: Duration,
    #[serde(default)]
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub cookie_header: Option<String>,
    pub csrf_cookie_name: String,
    pub user_agent: String,
    #[serde(default)]
    pub effects: EffectMap,
    /// Pre-existing resource name; the name effect only fills an empty field.
    #[serde(default)]
    pub resource_name: Option<String>,
}

/// Top-level ActivityInfo data container offered as a selectable option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    #[serde(rename = "databaseId", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl Database {
    /// Display text; falls back to the id when the label is absent.
    pub fn display_label(&self) -> &str {
        match self.label.as_deref() {
            Some(l) if !l.trim().is_empty() => l,
            _ => &self.id,
        }
    }
}

/// A data-collection schema nested under a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl Form {
    pub fn display_label(&self) -> &str {
        match self.label.as_deref() {
            Some(l) if !l.trim().is_empty() => l,
            _ => &self.id,
        }
    }
}

/// Forms endpoint result, partitioned by the server into forms and sub-forms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormList {
    #[serde(default)]
    pub forms: Vec<Form>,
    #[serde(default)]
    pub sub_forms: Vec<Form>,
}

impl FormList {
    pub fn is_empty(&self) -> bool {
        self.forms.is_empty() && self.sub_forms.is_empty()
    }

    /// One selectable list, forms first, then sub-forms.
    pub fn flattened(self) -> Vec<Form> {
        let mut all = self.forms;
        all.extend(self.sub_forms);
        all
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Xlsx,
    Text,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Csv, ExportFormat::Xlsx, ExportFormat::Text];

    /// File extension used in the download path segment.
    pub fn as_ext(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Text => "text",
        }
    }

    /// Upper-case variant used for the resource draft's format field.
    pub fn as_resource_format(self) -> &'static str {
        match self {
            ExportFormat::Csv => "CSV",
            ExportFormat::Xlsx => "XLSX",
            ExportFormat::Text => "TEXT",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ext())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            "text" => Ok(ExportFormat::Text),
            other => Err(format!(
                "invalid format '{other}', expected one of: csv, xlsx, text"
            )),
        }
    }
}

/// Server-side state of an export job. Anything the server reports that we
/// don't recognize maps to `Unknown` and is treated as still in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Progress body of a job status response. `percentComplete` missing in a
/// non-terminal response means 0, never an error.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub state: JobState,
    #[serde(default, rename = "percentComplete")]
    pub percent_complete: u8,
}

/// One polled snapshot of an export job, already lifted out of the wire
/// envelope (the body may ride under `result` or at the top level).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub state: JobState,
    pub percent_complete: u8,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WizardPhase {
    Databases,
    Forms,
    Submit,
    Poll,
    Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WizardEvent {
    PhaseStarted {
        phase: WizardPhase,
    },
    DatabasesLoaded {
        databases: Vec<Database>,
    },
    /// Flattened selectable list (forms first, then sub-forms).
    FormsLoaded {
        forms: Vec<Form>,
    },
    JobStarted {
        job_id: String,
    },
    JobProgress {
        state: JobState,
        percent: u8,
    },
    Info(InfoEvent),
    /// Terminal failure of the current operation, already normalized for display.
    Error {
        message: String,
    },
    RunCompleted {
        // Box to keep WizardEvent size small; RunOutcome carries the draft.
        outcome: Box<RunOutcome>,
    },
}

/// Structured info events emitted by the engine and consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    CsrfToken { source: CsrfSource },
    Saved { path: std::path::PathBuf },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CsrfSource {
    Flag,
    Environment,
    Cookie,
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::CsrfToken { source } => {
                let source = match source {
                    CsrfSource::Flag => "--csrf-token",
                    CsrfSource::Environment => "environment",
                    CsrfSource::Cookie => "cookie",
                };
                format!("Using CSRF token from {source}")
            }
            InfoEvent::Saved { path } => format!("Saved: {}", path.display()),
            InfoEvent::Cancelled => "Export cancelled".to_string(),
        }
    }
}

/// Record of one submit-to-terminal export cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    #[serde(default)]
    pub timestamp_utc: String,
    pub base_url: String,
    pub run_id: String,
    #[serde(default)]
    pub comments: Option<String>,
    pub database_id: String,
    #[serde(default)]
    pub database_label: Option<String>,
    pub form_id: String,
    #[serde(default)]
    pub form_label: Option<String>,
    pub format: ExportFormat,
    pub job_id: String,
    pub state: JobState,
    pub percent_complete: u8,
    /// The server may report `completed` without a URL; callers warn instead
    /// of failing.
    #[serde(default)]
    pub download_url: Option<String>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub draft: ResourceDraft,
    /// Draft fields touched by the completion effects, in application order.
    #[serde(default)]
    pub changed_fields: Vec<String>,
}

impl RunOutcome {
    pub fn form_display_label(&self) -> &str {
        match self.form_label.as_deref() {
            Some(l) if !l.trim().is_empty() => l,
            _ => &self.form_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_accepts_wire_and_short_ids() {
        let db: Database =
            serde_json::from_str(r#"{"databaseId":"d1","label":"Health"}"#).expect("wire shape");
        assert_eq!(db.id, "d1");
        assert_eq!(db.display_label(), "Health");

        let db: Database = serde_json::from_str(r#"{"id":"d2"}"#).expect("alias shape");
        assert_eq!(db.id, "d2");
        assert_eq!(db.display_label(), "d2");
    }

    #[test]
    fn form_label_falls_back_to_id() {
        let form: Form = serde_json::from_str(r#"{"id":"f1","label":"  "}"#).expect("form");
        assert_eq!(form.display_label(), "f1");
    }

    #[test]
    fn form_list_flattens_forms_first() {
        let list: FormList =
            serde_json::from_str(r#"{"forms":[{"id":"a"},{"id":"b"}],"sub_forms":[{"id":"s1"}]}"#)
                .expect("form list");
        let ids: Vec<_> = list.flattened().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, ["a", "b", "s1"]);
    }

    #[test]
    fn form_list_tolerates_missing_sub_forms() {
        let list: FormList = serde_json::from_str(r#"{"forms":[{"id":"a"}]}"#).expect("form list");
        assert_eq!(list.flattened().len(), 1);
    }

    #[test]
    fn unknown_job_state_is_not_terminal() {
        let status: JobStatus =
            serde_json::from_str(r#"{"state":"exporting","percentComplete":40}"#).expect("status");
        assert_eq!(status.state, JobState::Unknown);
        assert!(!status.state.is_terminal());
    }

    #[test]
    fn missing_percent_defaults_to_zero() {
        let status: JobStatus = serde_json::from_str(r#"{"state":"running"}"#).expect("status");
        assert_eq!(status.percent_complete, 0);
        assert_eq!(status.state, JobState::Running);
    }

    #[test]
    fn format_round_trips_through_str() {
        for fmt in ExportFormat::ALL {
            assert_eq!(fmt.as_ext().parse::<ExportFormat>().ok(), Some(fmt));
        }
        assert!("pdf".parse::<ExportFormat>().is_err());
        assert_eq!("XLSX".parse::<ExportFormat>().ok(), Some(ExportFormat::Xlsx));
    }
}
