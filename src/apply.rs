//! Completion side effects applied to a host resource draft.
//!
//! Which fields get touched is a configurable mapping supplied by the caller,
//! never a hard-coded set of field names.

use crate::model::ExportFormat;
use serde::{Deserialize, Serialize};

/// Draft field written when `plain_url` switches the resource to link mode.
const URL_TYPE_FIELD: &str = "url_type";

/// Named completion effects. Each target is optional; an unset target skips
/// that effect entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectMap {
    #[serde(default)]
    pub url_field: Option<String>,
    #[serde(default)]
    pub name_field: Option<String>,
    #[serde(default)]
    pub format_field: Option<String>,
    #[serde(default)]
    pub description_field: Option<String>,
    /// Switch the draft's url_type to the empty "plain URL" mode.
    #[serde(default)]
    pub plain_url: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftField {
    pub field: String,
    pub value: String,
}

/// Ordered key/value view of the host form the wizard writes into.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDraft {
    fields: Vec<DraftField>,
}

impl ResourceDraft {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.field == field)
            .map(|f| f.value.as_str())
    }

    /// Insert or overwrite a field, preserving first-write ordering.
    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|f| f.field == field) {
            Some(existing) => existing.value = value,
            None => self.fields.push(DraftField {
                field: field.to_string(),
                value,
            }),
        }
    }

    pub fn is_blank(&self, field: &str) -> bool {
        self.get(field).map(str::trim).unwrap_or("").is_empty()
    }

    pub fn fields(&self) -> &[DraftField] {
        &self.fields
    }
}

/// Inputs for one completion application.
pub struct CompletionContext<'a> {
    pub download_url: Option<&'a str>,
    pub form_label: &'a str,
    pub format: ExportFormat,
    pub description: &'a str,
}

/// Synthesize the human-readable description from the selected labels.
pub fn describe_selection(database_label: &str, form_label: &str) -> String {
    let mut desc = String::from("This resource was downloaded from ActivityInfo.");
    if !database_label.trim().is_empty() || !form_label.trim().is_empty() {
        let db = if database_label.trim().is_empty() {
            "-"
        } else {
            database_label
        };
        let form = if form_label.trim().is_empty() {
            "-"
        } else {
            form_label
        };
        desc.push_str(&format!(" Database: {db}, Form: {form}"));
    }
    desc
}

/// Apply the configured effects of a completed job to the draft. Returns the
/// names of the fields that changed, in application order; callers use that
/// list as the change notification for dependent UI.
pub fn apply_completion(
    effects: &EffectMap,
    ctx: &CompletionContext<'_>,
    draft: &mut ResourceDraft,
) -> Vec<String> {
    let mut changed = Vec::new();

    if let (Some(field), Some(url)) = (effects.url_field.as_deref(), ctx.download_url) {
        draft.set(field, url);
        changed.push(field.to_string());
    }

    // The name is only defaulted, never overwritten.
    if let Some(field) = effects.name_field.as_deref() {
        if draft.is_blank(field) && !ctx.form_label.trim().is_empty() {
            draft.set(field, ctx.form_label);
            changed.push(field.to_string());
        }
    }

    if let Some(field) = effects.format_field.as_deref() {
        draft.set(field, ctx.format.as_resource_format());
        changed.push(field.to_string());
    }

    if let Some(field) = effects.description_field.as_deref() {
        draft.set(field, ctx.description);
        changed.push(field.to_string());
    }

    if effects.plain_url {
        draft.set(URL_TYPE_FIELD, "");
        changed.push(URL_TYPE_FIELD.to_string());
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effects() -> EffectMap {
        EffectMap {
            url_field: Some("url".to_string()),
            name_field: Some("name".to_string()),
            format_field: Some("format".to_string()),
            description_field: Some("description".to_string()),
            plain_url: false,
        }
    }

    fn ctx<'a>(url: Option<&'a str>) -> CompletionContext<'a> {
        CompletionContext {
            download_url: url,
            form_label: "Health Survey",
            format: ExportFormat::Csv,
            description: "This resource was downloaded from ActivityInfo.",
        }
    }

    #[test]
    fn url_field_gets_download_link_and_notification() {
        let mut draft = ResourceDraft::default();
        let changed = apply_completion(&effects(), &ctx(Some("https://x/dl.csv")), &mut draft);
        assert_eq!(draft.get("url"), Some("https://x/dl.csv"));
        assert_eq!(changed.first().map(String::as_str), Some("url"));
    }

    #[test]
    fn name_is_defaulted_only_when_empty() {
        let mut draft = ResourceDraft::default();
        apply_completion(&effects(), &ctx(None), &mut draft);
        assert_eq!(draft.get("name"), Some("Health Survey"));

        let mut draft = ResourceDraft::default();
        draft.set("name", "My existing name");
        let changed = apply_completion(&effects(), &ctx(None), &mut draft);
        assert_eq!(draft.get("name"), Some("My existing name"));
        assert!(!changed.contains(&"name".to_string()));
    }

    #[test]
    fn format_is_upper_cased() {
        let mut draft = ResourceDraft::default();
        apply_completion(&effects(), &ctx(None), &mut draft);
        assert_eq!(draft.get("format"), Some("CSV"));
    }

    #[test]
    fn unset_targets_are_skipped() {
        let mut draft = ResourceDraft::default();
        let changed = apply_completion(
            &EffectMap::default(),
            &ctx(Some("https://x/dl.csv")),
            &mut draft,
        );
        assert!(changed.is_empty());
        assert!(draft.fields().is_empty());
    }

    #[test]
    fn plain_url_switches_url_type() {
        let mut draft = ResourceDraft::default();
        draft.set("url_type", "upload");
        let map = EffectMap {
            plain_url: true,
            ..EffectMap::default()
        };
        let changed = apply_completion(&map, &ctx(None), &mut draft);
        assert_eq!(draft.get("url_type"), Some(""));
        assert_eq!(changed, ["url_type"]);
    }

    #[test]
    fn description_synthesis_matches_selection_labels() {
        assert_eq!(
            describe_selection("Ops", "Survey"),
            "This resource was downloaded from ActivityInfo. Database: Ops, Form: Survey"
        );
        assert_eq!(
            describe_selection("", "Survey"),
            "This resource was downloaded from ActivityInfo. Database: -, Form: Survey"
        );
        assert_eq!(
            describe_selection("", ""),
            "This resource was downloaded from ActivityInfo."
        );
    }
}
