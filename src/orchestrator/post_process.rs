//! Post-run processing utilities.
//!
//! Handles auto-save and explicit exports after a run completes.

use crate::cli::Cli;
use crate::model::RunOutcome;
use crate::storage;

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub export_messages: Vec<String>,
    pub auto_saved_path: Option<std::path::PathBuf>,
}

/// Process a completed run: auto-save and run any explicit exports.
pub(crate) fn process_run_completion(
    args: &Cli,
    auto_save: bool,
    outcome: &RunOutcome,
) -> ProcessedRun {
    let auto_saved_path = if auto_save {
        storage::save_run(outcome).ok()
    } else {
        None
    };

    let mut export_messages = Vec::new();
    if let Some(export_path) = args.export_json.as_deref() {
        match storage::export_json(export_path, outcome) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }
    if let Some(export_path) = args.export_csv.as_deref() {
        match storage::export_csv(export_path, outcome) {
            Ok(_) => export_messages.push(format!("Exported CSV: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export CSV failed: {e:#}")),
        }
    }

    ProcessedRun {
        export_messages,
        auto_saved_path,
    }
}
