//! Saved run outcomes: auto-save under the platform data dir, history
//! loading, and explicit JSON/CSV exports.

use crate::model::RunOutcome;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "activityinfo-export";

fn runs_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("no platform data directory")?;
    Ok(base.join(APP_DIR).join("runs"))
}

/// Persist one outcome as pretty JSON, one file per run. The filename sorts
/// chronologically (timestamp first, run id as tiebreaker).
pub fn save_run(outcome: &RunOutcome) -> Result<PathBuf> {
    let dir = runs_dir()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

    let stamp: String = outcome
        .timestamp_utc
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let path = dir.join(format!("{stamp}-{}.json", outcome.run_id));
    let json = serde_json::to_string_pretty(outcome)?;
    fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Load the most recent saved outcomes, newest first. Unreadable files are
/// skipped rather than failing the whole listing.
pub fn load_recent(limit: usize) -> Result<Vec<RunOutcome>> {
    let dir = runs_dir()?;
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut names: Vec<PathBuf> = fs::read_dir(&dir)
        .with_context(|| format!("read {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    names.sort();
    names.reverse();

    let mut runs = Vec::new();
    for path in names.into_iter().take(limit) {
        let Ok(raw) = fs::read_to_string(&path) else {
            continue;
        };
        if let Ok(outcome) = serde_json::from_str::<RunOutcome>(&raw) {
            runs.push(outcome);
        }
    }
    Ok(runs)
}

pub fn export_json(path: &Path, outcome: &RunOutcome) -> Result<()> {
    let json = serde_json::to_string_pretty(outcome)?;
    fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Single-record CSV export: header row plus one data row.
pub fn export_csv(path: &Path, outcome: &RunOutcome) -> Result<()> {
    let header = [
        "timestamp_utc",
        "run_id",
        "base_url",
        "database_id",
        "database_label",
        "form_id",
        "form_label",
        "format",
        "job_id",
        "state",
        "download_url",
        "elapsed_ms",
    ];
    let row = [
        outcome.timestamp_utc.clone(),
        outcome.run_id.clone(),
        outcome.base_url.clone(),
        outcome.database_id.clone(),
        outcome.database_label.clone().unwrap_or_default(),
        outcome.form_id.clone(),
        outcome.form_label.clone().unwrap_or_default(),
        outcome.format.to_string(),
        outcome.job_id.clone(),
        outcome.state.to_string(),
        outcome.download_url.clone().unwrap_or_default(),
        outcome.elapsed_ms.to_string(),
    ];
    let mut text = header.join(",");
    text.push('\n');
    text.push_str(
        &row.iter()
            .map(|cell| csv_escape(cell))
            .collect::<Vec<_>>()
            .join(","),
    );
    text.push('\n');
    fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn csv_escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
