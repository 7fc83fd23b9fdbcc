//! HTTP client for the portal's ActivityInfo endpoints.
//!
//! Wraps one `reqwest::Client` per wizard instance. Action endpoints are
//! CKAN-style POSTs returning `{success, result, error}` envelopes; the
//! download/job-status routes are plain GETs under a configurable prefix.

use crate::error::{api_message, ErrorPayload, WizardError};
use crate::model::{CsrfSource, Database, FormList, JobSnapshot, JobStatus, RunConfig};
use serde::Deserialize;
use tracing::debug;

/// Literal placeholder replaced with the job id in a status URL template.
pub const JOB_ID_PLACEHOLDER: &str = "__JOB_ID__";

/// Header carrying the CSRF token on state-mutating requests.
const CSRF_HEADER: &str = "X-CSRFToken";

/// Environment variable consulted when no explicit token is configured.
pub const CSRF_TOKEN_ENV: &str = "CKAN_CSRF_TOKEN";

#[derive(Debug, Deserialize)]
struct ActionEnvelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

/// Status responses carry the body either under `result` or inline at the
/// top level; `download_url` always rides at the top level.
#[derive(Debug, Deserialize)]
struct JobStatusEnvelope {
    #[serde(default)]
    result: Option<JobStatus>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    error: Option<ErrorPayload>,
    #[serde(flatten)]
    inline: JobStatus,
}

impl JobStatusEnvelope {
    fn into_snapshot(self) -> JobSnapshot {
        let status = self.result.unwrap_or(self.inline);
        JobSnapshot {
            state: status.state,
            percent_complete: status.percent_complete,
            download_url: self.download_url,
            error: self.error.map(|e| e.to_message()),
        }
    }
}

pub struct PortalClient {
    http: reqwest::Client,
    base_url: String,
    route_prefix: String,
    csrf_token: Option<String>,
    job_status_template: Option<String>,
}

impl PortalClient {
    pub fn new(cfg: &RunConfig) -> Result<Self, WizardError> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            route_prefix: cfg.route_prefix.trim_matches('/').to_string(),
            csrf_token: resolve_csrf_token(cfg).map(|(token, _)| token),
            job_status_template: cfg.job_status_template.clone(),
        })
    }

    fn action_url(&self, action: &str) -> String {
        format!("{}/api/action/{}", self.base_url, action)
    }

    fn prefixed_url(&self, rest: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.route_prefix, rest)
    }

    /// Status URL for a job: the caller-supplied template with the job id
    /// substituted, or the default prefixed route.
    pub fn job_status_url(&self, job_id: &str) -> String {
        match self.job_status_template.as_deref() {
            Some(template) => template.replace(JOB_ID_PLACEHOLDER, job_id),
            None => self.prefixed_url(&format!("job-status/{job_id}")),
        }
    }

    async fn post_action<T: serde::de::DeserializeOwned + Default>(
        &self,
        action: &str,
        body: &serde_json::Value,
    ) -> Result<ActionEnvelope<T>, WizardError> {
        let url = self.action_url(action);
        debug!(%url, "POST action");
        let mut req = self.http.post(&url).json(body);
        if let Some(token) = self.csrf_token.as_deref() {
            req = req.header(CSRF_HEADER, token);
        }
        let envelope = req.send().await?.json::<ActionEnvelope<T>>().await?;
        debug!(%url, success = envelope.success, "action completed");
        Ok(envelope)
    }

    pub async fn fetch_databases(&self) -> Result<Vec<Database>, WizardError> {
        let envelope: ActionEnvelope<Vec<Database>> = self
            .post_action("act_info_get_databases", &serde_json::json!({}))
            .await?;
        unwrap_envelope(envelope, "Failed to load databases")
    }

    pub async fn fetch_forms(&self, database_id: &str) -> Result<FormList, WizardError> {
        let body = serde_json::json!({ "database_id": database_id });
        let envelope: ActionEnvelope<FormList> =
            self.post_action("act_info_get_forms", &body).await?;
        unwrap_envelope(envelope, "Failed to load forms")
    }

    /// REST-style variant of the forms listing (no sub-form partition).
    pub async fn fetch_forms_rest(&self, database_id: &str) -> Result<FormList, WizardError> {
        let url = self.prefixed_url(&format!("api/database/{database_id}/forms"));
        debug!(%url, "GET forms");
        let envelope: ActionEnvelope<FormList> =
            self.http.get(&url).send().await?.json().await?;
        unwrap_envelope(envelope, "Failed to load forms")
    }

    /// Kick off a server-side export job and return its id.
    pub async fn start_export(&self, form_id: &str, format: &str) -> Result<String, WizardError> {
        let url = self.prefixed_url(&format!("download/{form_id}.{format}"));
        debug!(%url, "starting export job");
        let resp: StartResponse = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        match resp {
            StartResponse {
                success: true,
                job_id: Some(job_id),
                ..
            } => Ok(job_id),
            StartResponse { error, .. } => Err(WizardError::Api(api_message(
                error,
                "Failed to start download job",
            ))),
        }
    }

    pub async fn fetch_job_status(&self, job_id: &str) -> Result<JobSnapshot, WizardError> {
        let url = self.job_status_url(job_id);
        debug!(%url, "polling job status");
        let envelope: JobStatusEnvelope = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope.into_snapshot())
    }
}

fn unwrap_envelope<T>(envelope: ActionEnvelope<T>, fallback: &str) -> Result<T, WizardError> {
    if !envelope.success {
        return Err(WizardError::Api(api_message(envelope.error, fallback)));
    }
    envelope
        .result
        .ok_or_else(|| WizardError::Api(fallback.to_string()))
}

/// Resolve the CSRF token, first match wins: explicit flag, environment
/// variable, then a named cookie in the configured cookie header. Absence is
/// tolerated; the header is simply omitted.
pub fn resolve_csrf_token(cfg: &RunConfig) -> Option<(String, CsrfSource)> {
    if let Some(token) = non_empty(cfg.csrf_token.as_deref()) {
        return Some((token, CsrfSource::Flag));
    }
    if let Ok(token) = std::env::var(CSRF_TOKEN_ENV) {
        if !token.trim().is_empty() {
            return Some((token, CsrfSource::Environment));
        }
    }
    let header = cfg.cookie_header.as_deref()?;
    cookie_value(header, &cfg.csrf_cookie_name).map(|token| (token, CsrfSource::Cookie))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Extract a named cookie's value from a `Cookie:` header string.
fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key.trim() == name {
            non_empty(Some(value))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExportFormat, JobState};
    use std::time::Duration;

    fn test_config() -> RunConfig {
        RunConfig {
            base_url: "https://portal.example.org/".to_string(),
            route_prefix: "/activity-info/".to_string(),
            run_id: "t".to_string(),
            comments: None,
            database_id: None,
            database_label: None,
            form_id: None,
            form_label: None,
            format: ExportFormat::Csv,
            rest_forms: false,
            job_status_template: None,
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            job_timeout: Duration::from_secs(300),
            csrf_token: None,
            cookie_header: None,
            csrf_cookie_name: "csrf_token".to_string(),
            user_agent: "test".to_string(),
            effects: Default::default(),
            resource_name: None,
        }
    }

    fn test_client() -> PortalClient {
        PortalClient::new(&test_config()).expect("client")
    }

    #[test]
    fn urls_are_built_without_duplicate_slashes() {
        let client = test_client();
        assert_eq!(
            client.action_url("act_info_get_databases"),
            "https://portal.example.org/api/action/act_info_get_databases"
        );
        assert_eq!(
            client.prefixed_url("download/f1.csv"),
            "https://portal.example.org/activity-info/download/f1.csv"
        );
        assert_eq!(
            client.job_status_url("j9"),
            "https://portal.example.org/activity-info/job-status/j9"
        );
    }

    #[test]
    fn status_template_substitutes_job_id() {
        let mut cfg = test_config();
        cfg.job_status_template =
            Some("https://portal.example.org/alt/job-status/__JOB_ID__".to_string());
        let client = PortalClient::new(&cfg).expect("client");
        assert_eq!(
            client.job_status_url("abc123"),
            "https://portal.example.org/alt/job-status/abc123"
        );
    }

    #[test]
    fn status_body_may_ride_under_result_or_inline() {
        let nested: JobStatusEnvelope = serde_json::from_str(
            r#"{"success":true,"result":{"state":"running","percentComplete":55},"download_url":null}"#,
        )
        .expect("nested");
        let snap = nested.into_snapshot();
        assert_eq!(snap.state, JobState::Running);
        assert_eq!(snap.percent_complete, 55);

        let inline: JobStatusEnvelope =
            serde_json::from_str(r#"{"state":"completed","download_url":"/dl/x.csv"}"#)
                .expect("inline");
        let snap = inline.into_snapshot();
        assert_eq!(snap.state, JobState::Completed);
        assert_eq!(snap.download_url.as_deref(), Some("/dl/x.csv"));
    }

    #[test]
    fn status_error_payload_is_normalized() {
        let envelope: JobStatusEnvelope =
            serde_json::from_str(r#"{"state":"failed","error":{"message":"export blew up"}}"#)
                .expect("failed status");
        let snap = envelope.into_snapshot();
        assert_eq!(snap.state, JobState::Failed);
        assert_eq!(snap.error.as_deref(), Some("export blew up"));
    }

    #[test]
    fn envelope_failure_extracts_normalized_message() {
        let envelope: ActionEnvelope<Vec<Database>> =
            serde_json::from_str(r#"{"success":false,"error":{"__type":"AuthError"}}"#)
                .expect("envelope");
        match unwrap_envelope(envelope, "Failed to load databases") {
            Err(WizardError::Api(msg)) => assert_eq!(msg, "AuthError"),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn envelope_success_without_result_is_an_api_error() {
        let envelope: ActionEnvelope<Vec<Database>> =
            serde_json::from_str(r#"{"success":true}"#).expect("envelope");
        assert!(matches!(
            unwrap_envelope(envelope, "Failed to load databases"),
            Err(WizardError::Api(_))
        ));
    }

    #[test]
    fn cookie_lookup_finds_named_value() {
        assert_eq!(
            cookie_value("session=abc; csrf_token=tok123; theme=dark", "csrf_token"),
            Some("tok123".to_string())
        );
        assert_eq!(cookie_value("session=abc", "csrf_token"), None);
        assert_eq!(cookie_value("csrf_token=", "csrf_token"), None);
    }

    #[test]
    fn explicit_flag_wins_over_cookie() {
        let mut cfg = test_config();
        cfg.csrf_token = Some("flag-token".to_string());
        cfg.cookie_header = Some("csrf_token=cookie-token".to_string());
        let resolved = resolve_csrf_token(&cfg);
        assert_eq!(
            resolved,
            Some(("flag-token".to_string(), CsrfSource::Flag))
        );
    }

    #[test]
    fn cookie_is_used_when_nothing_else_matches() {
        let mut cfg = test_config();
        cfg.cookie_header = Some("a=b; csrf_token=cookie-token".to_string());
        let resolved = resolve_csrf_token(&cfg);
        assert_eq!(
            resolved,
            Some(("cookie-token".to_string(), CsrfSource::Cookie))
        );
    }
}
