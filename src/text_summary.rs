use crate::model::{JobState, RunOutcome};

pub struct TextSummary {
    pub lines: Vec<String>,
}

/// Assemble the human-readable summary printed after a run in text mode.
pub fn build_text_summary(outcome: &RunOutcome) -> TextSummary {
    let mut lines = Vec::new();

    lines.push("ActivityInfo export".to_string());
    lines.push(format!(
        "  Database: {}",
        outcome
            .database_label
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(&outcome.database_id)
    ));
    lines.push(format!("  Form:     {}", outcome.form_display_label()));
    lines.push(format!(
        "  Format:   {}",
        outcome.format.as_resource_format()
    ));
    lines.push(format!("  Job:      {} ({})", outcome.job_id, outcome.state));
    lines.push(format!(
        "  Elapsed:  {:.1}s",
        outcome.elapsed_ms as f64 / 1000.0
    ));

    match outcome.download_url.as_deref() {
        Some(url) => lines.push(format!("  Download: {url}")),
        None if outcome.state == JobState::Completed => {
            lines.push("  Download completed but no download URL provided".to_string());
        }
        None => {}
    }

    if !outcome.draft.fields().is_empty() {
        lines.push("Resource draft:".to_string());
        for field in outcome.draft.fields() {
            lines.push(format!("  {}: {}", field.field, field.value));
        }
    }

    if let Some(comments) = outcome.comments.as_deref() {
        lines.push(format!("Comments: {comments}"));
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::ResourceDraft;
    use crate::model::ExportFormat;

    fn outcome(url: Option<&str>) -> RunOutcome {
        RunOutcome {
            timestamp_utc: "2026-01-01T00:00:00Z".to_string(),
            base_url: "https://portal.example.org".to_string(),
            run_id: "r1".to_string(),
            comments: None,
            database_id: "d1".to_string(),
            database_label: Some("Ops".to_string()),
            form_id: "f1".to_string(),
            form_label: Some("Survey".to_string()),
            format: ExportFormat::Csv,
            job_id: "j1".to_string(),
            state: JobState::Completed,
            percent_complete: 100,
            download_url: url.map(str::to_string),
            elapsed_ms: 4200,
            draft: ResourceDraft::default(),
            changed_fields: Vec::new(),
        }
    }

    #[test]
    fn summary_shows_download_url() {
        let summary = build_text_summary(&outcome(Some("https://x/dl.csv")));
        assert!(summary
            .lines
            .iter()
            .any(|l| l.contains("https://x/dl.csv")));
    }

    #[test]
    fn completed_without_url_gets_a_warning_line() {
        let summary = build_text_summary(&outcome(None));
        assert!(summary
            .lines
            .iter()
            .any(|l| l.contains("no download URL provided")));
    }
}
