use crate::apply::EffectMap;
use crate::client::PortalClient;
use crate::engine::{catalog, ExportEngine};
use crate::model::{ExportFormat, RunConfig, WizardEvent};
use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "activityinfo-export",
    version,
    about = "ActivityInfo export wizard for CKAN portals, with optional TUI"
)]
pub struct Cli {
    /// Base URL of the portal serving the ActivityInfo endpoints
    #[arg(long, default_value = "http://localhost:5000")]
    pub base_url: String,

    /// Route prefix for the download and job-status endpoints
    #[arg(long, default_value = "activity-info")]
    pub route_prefix: String,

    /// Print the JSON outcome and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print a text summary and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// List the available databases and exit
    #[arg(long)]
    pub list_databases: bool,

    /// List the forms of --database (forms first, then sub-forms) and exit
    #[arg(long)]
    pub list_forms: bool,

    /// Print the most recently saved run outcomes and exit
    #[arg(long, value_name = "N", num_args = 0..=1, default_missing_value = "10")]
    pub history: Option<usize>,

    /// Database id to export from
    #[arg(long)]
    pub database: Option<String>,

    /// Database label used in the draft description (lookup skipped with --form-label)
    #[arg(long)]
    pub database_label: Option<String>,

    /// Form id to export
    #[arg(long)]
    pub form: Option<String>,

    /// Form label; when given, the catalog lookups are skipped entirely
    #[arg(long)]
    pub form_label: Option<String>,

    /// Export format: csv, xlsx or text
    #[arg(long, default_value = "csv")]
    pub format: ExportFormat,

    /// Use the REST-style forms endpoint instead of the action API
    #[arg(long)]
    pub rest_forms: bool,

    /// Job status URL template; the literal __JOB_ID__ is replaced with the job id
    #[arg(long, value_name = "URL")]
    pub job_status_url: Option<String>,

    /// Delay between job status polls
    #[arg(long, default_value = "2s")]
    pub poll_interval: humantime::Duration,

    /// Timeout for individual HTTP requests
    #[arg(long, default_value = "30s")]
    pub request_timeout: humantime::Duration,

    /// Overall cap on waiting for the export job
    #[arg(long, default_value = "5m")]
    pub job_timeout: humantime::Duration,

    /// CSRF token attached to state-mutating requests
    #[arg(long)]
    pub csrf_token: Option<String>,

    /// Cookie header to read the CSRF token from (after --csrf-token and $CKAN_CSRF_TOKEN)
    #[arg(long)]
    pub cookie: Option<String>,

    /// Name of the cookie holding the CSRF token
    #[arg(long, default_value = "csrf_token")]
    pub csrf_cookie_name: String,

    /// Draft field receiving the download URL (empty disables the effect)
    #[arg(long, default_value = "url")]
    pub url_field: String,

    /// Draft field receiving the resource name; only filled when empty
    #[arg(long, default_value = "name")]
    pub name_field: String,

    /// Draft field receiving the upper-cased format (empty disables the effect)
    #[arg(long, default_value = "format")]
    pub format_field: String,

    /// Draft field receiving the synthesized description (empty disables the effect)
    #[arg(long, default_value = "description")]
    pub description_field: String,

    /// Switch the draft's url_type to plain-URL mode on completion
    #[arg(long)]
    pub plain_url: bool,

    /// Existing resource name; an existing value is never overwritten
    #[arg(long)]
    pub resource_name: Option<String>,

    /// Export the outcome as JSON
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,

    /// Export the outcome as CSV
    #[arg(long)]
    pub export_csv: Option<std::path::PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// Attach custom comments to this run
    #[arg(long)]
    pub comments: Option<String>,

    /// Load the database list as soon as the TUI opens
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub load_on_launch: bool,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    if let Some(limit) = args.history {
        return print_history(limit, args.json);
    }
    if args.list_databases {
        return list_databases(&args).await;
    }
    if args.list_forms {
        return list_forms(&args).await;
    }

    if args.json || args.text || args.silent {
        if args.form.is_none() {
            return Err(anyhow::anyhow!(
                "non-interactive export requires --form (and --database unless --form-label is given)"
            ));
        }
        if args.form_label.is_none() && args.database.is_none() {
            return Err(anyhow::anyhow!(
                "--database is required unless the selection is pre-resolved with --form-label"
            ));
        }
    }

    // Silent mode takes precedence over other output modes
    if args.silent {
        return run_export_engine(args, true).await;
    }

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args).await;
        }
    }

    if args.json {
        return run_export_engine(args, false).await;
    }

    run_text(args).await
}

/// Generate a random id for one wizard run.
fn gen_run_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    u64::from_le_bytes(b).to_string()
}

fn opt_field(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        base_url: args.base_url.clone(),
        route_prefix: args.route_prefix.clone(),
        run_id: gen_run_id(),
        comments: args.comments.clone(),
        database_id: args.database.clone(),
        database_label: args.database_label.clone(),
        form_id: args.form.clone(),
        form_label: args.form_label.clone(),
        format: args.format,
        rest_forms: args.rest_forms,
        job_status_template: args.job_status_url.clone(),
        poll_interval: Duration::from(args.poll_interval),
        request_timeout: Duration::from(args.request_timeout),
        job_timeout: Duration::from(args.job_timeout),
        csrf_token: args.csrf_token.clone(),
        cookie_header: args.cookie.clone(),
        csrf_cookie_name: args.csrf_cookie_name.clone(),
        user_agent: format!("activityinfo-export-cli/{}", env!("CARGO_PKG_VERSION")),
        effects: EffectMap {
            url_field: opt_field(&args.url_field),
            name_field: opt_field(&args.name_field),
            format_field: opt_field(&args.format_field),
            description_field: opt_field(&args.description_field),
            plain_url: args.plain_url,
        },
        resource_name: args.resource_name.clone(),
    }
}

fn print_history(limit: usize, json: bool) -> Result<()> {
    let runs = crate::storage::load_recent(limit).context("failed to load saved runs")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        eprintln!("No saved runs");
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {}  {}  {}  {}",
            run.timestamp_utc,
            run.form_display_label(),
            run.format.as_resource_format(),
            run.state,
            run.download_url.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn list_databases(args: &Cli) -> Result<()> {
    let cfg = build_config(args);
    let client = PortalClient::new(&cfg).context("failed to build HTTP client")?;
    let databases = catalog::load_databases(&client)
        .await
        .context("failed to load databases")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&databases)?);
        return Ok(());
    }
    for db in &databases {
        println!("{}\t{}", db.id, db.display_label());
    }
    Ok(())
}

async fn list_forms(args: &Cli) -> Result<()> {
    let database_id = args
        .database
        .as_deref()
        .context("--list-forms requires --database")?;
    let cfg = build_config(args);
    let client = PortalClient::new(&cfg).context("failed to build HTTP client")?;
    let forms = catalog::load_forms(&client, database_id, args.rest_forms)
        .await
        .context("failed to load forms")?
        .flattened();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&forms)?);
        return Ok(());
    }
    for form in &forms {
        println!("{}\t{}", form.id, form.display_label());
    }
    Ok(())
}

/// Common function to run the export engine and process results.
/// `silent` controls whether to consume events and suppress output.
async fn run_export_engine(args: Cli, silent: bool) -> Result<()> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = if silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };

    let outcome = if silent {
        // In silent mode, spawn the task and consume events
        let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<WizardEvent>();
        let (_, ctrl_rx) = mpsc::unbounded_channel();

        let engine = ExportEngine::new(cfg);
        let handle = tokio::spawn(async move { engine.run(evt_tx, ctrl_rx).await });

        // Consume events silently (no output)
        while let Some(_ev) = evt_rx.recv().await {
            // All events are silently consumed - no output
        }

        handle
            .await
            .context("export task failed")?
            .context("export failed")?
    } else {
        // In JSON mode, directly await the engine (no need to consume events)
        let (evt_tx, _) = mpsc::unbounded_channel::<WizardEvent>();
        let (_, ctrl_rx) = mpsc::unbounded_channel();

        let engine = ExportEngine::new(cfg);
        engine
            .run(evt_tx, ctrl_rx)
            .await
            .context("export failed")?
    };

    // Handle exports (errors will propagate)
    handle_exports(&args, &outcome)?;

    if let Some(tx) = out_tx.as_ref() {
        // Print JSON output in non-silent mode
        let out = serde_json::to_string_pretty(&outcome)?;
        let _ = tx.send(OutputLine::Stdout(out));
    }

    // Save results if auto_save is enabled
    if args.auto_save {
        if silent {
            crate::storage::save_run(&outcome).context("failed to save run outcome")?;
        } else if let Some(tx) = out_tx.as_ref() {
            if let Ok(p) = crate::storage::save_run(&outcome) {
                let _ = tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
            }
        }
    }

    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    Ok(())
}

async fn run_text(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<WizardEvent>();
    let (_, ctrl_rx) = mpsc::unbounded_channel();

    let engine = ExportEngine::new(cfg);
    let handle = tokio::spawn(async move { engine.run(evt_tx, ctrl_rx).await });

    while let Some(ev) = evt_rx.recv().await {
        match ev {
            WizardEvent::PhaseStarted { phase } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("== {phase:?} ==")));
            }
            WizardEvent::DatabasesLoaded { databases } => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "Found {} database(s)",
                    databases.len()
                )));
            }
            WizardEvent::FormsLoaded { forms } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Found {} form(s)", forms.len())));
            }
            WizardEvent::JobStarted { job_id } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Export job started: {job_id}")));
            }
            WizardEvent::JobProgress { state, percent } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("{percent}% ({state})")));
            }
            WizardEvent::Info(info) => {
                let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
            }
            WizardEvent::Error { message } => {
                let _ = out_tx.send(OutputLine::Stderr(message));
            }
            WizardEvent::RunCompleted { .. } => {}
        }
    }

    let outcome = handle
        .await
        .context("export task failed")?
        .context("export failed")?;

    handle_exports(&args, &outcome)?;
    let summary = crate::text_summary::build_text_summary(&outcome);
    for line in summary.lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    if args.auto_save {
        if let Ok(p) = crate::storage::save_run(&outcome) {
            let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

/// Handle export operations (JSON and CSV) for both text and JSON modes.
fn handle_exports(args: &Cli, outcome: &crate::model::RunOutcome) -> Result<()> {
    if let Some(p) = args.export_json.as_deref() {
        crate::storage::export_json(p, outcome)?;
    }
    if let Some(p) = args.export_csv.as_deref() {
        crate::storage::export_csv(p, outcome)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Cli {
        let mut argv = vec!["activityinfo-export"];
        argv.extend_from_slice(extra);
        Cli::parse_from(argv)
    }

    #[test]
    fn config_carries_selection_and_timing() {
        let args = parse(&[
            "--database",
            "d1",
            "--form",
            "f1",
            "--format",
            "xlsx",
            "--poll-interval",
            "1500ms",
        ]);
        let cfg = build_config(&args);
        assert_eq!(cfg.database_id.as_deref(), Some("d1"));
        assert_eq!(cfg.form_id.as_deref(), Some("f1"));
        assert_eq!(cfg.format, ExportFormat::Xlsx);
        assert_eq!(cfg.poll_interval, Duration::from_millis(1500));
        assert_eq!(cfg.job_timeout, Duration::from_secs(300));
        assert!(!cfg.run_id.is_empty());
    }

    #[test]
    fn empty_effect_flags_disable_effects() {
        let args = parse(&["--url-field", "", "--name-field", " "]);
        let cfg = build_config(&args);
        assert!(cfg.effects.url_field.is_none());
        assert!(cfg.effects.name_field.is_none());
        assert_eq!(cfg.effects.format_field.as_deref(), Some("format"));
    }

    #[tokio::test]
    async fn silent_requires_json() {
        let args = parse(&["--silent", "--form", "f1", "--form-label", "Survey"]);
        let err = run(args).await.expect_err("silent without json");
        assert!(err.to_string().contains("--silent"));
    }
}
