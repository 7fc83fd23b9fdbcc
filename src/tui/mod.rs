mod help;

use crate::cli::{build_config, Cli};
use crate::client::PortalClient;
use crate::engine::catalog::{self, Selection};
use crate::model::{
    Database, ExportFormat, Form, InfoEvent, JobState, RunConfig, RunOutcome, WizardEvent,
    WizardPhase,
};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph},
    Frame, Terminal,
};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Catalog loads requested by the UI thread and served on the runtime.
enum CatalogCommand {
    LoadDatabases,
    LoadForms { database_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Databases,
    Forms,
    Format,
}

struct UiState {
    base_url: String,
    step: Step,

    databases: Vec<Database>,
    db_cursor: usize,
    databases_loaded: bool,
    loading_databases: bool,

    forms: Vec<Form>,
    form_cursor: usize,
    loading_forms: bool,

    format_cursor: usize,
    selection: Selection,

    job_running: bool,
    paused: bool,
    job_id: Option<String>,
    job_state: Option<JobState>,
    percent: u8,

    outcome: Option<RunOutcome>,
    error: Option<String>,
    info: String,
    show_help: bool,
    auto_save: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            step: Step::Databases,
            databases: Vec::new(),
            db_cursor: 0,
            databases_loaded: false,
            loading_databases: false,
            forms: Vec::new(),
            form_cursor: 0,
            loading_forms: false,
            format_cursor: 0,
            selection: Selection::default(),
            job_running: false,
            paused: false,
            job_id: None,
            job_state: None,
            percent: 0,
            outcome: None,
            error: None,
            info: String::new(),
            show_help: false,
            auto_save: true,
        }
    }
}

pub async fn run(args: Cli) -> Result<()> {
    // Unbounded channels avoid backpressure between the UI thread and the runtime.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<WizardEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let (catalog_tx, catalog_rx) = mpsc::unbounded_channel::<CatalogCommand>();

    // Catalog lookups run on the runtime; the UI thread only consumes results.
    let loader = tokio::spawn(run_catalog_loader(
        build_config(&args),
        catalog_rx,
        event_tx.clone(),
    ));

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let ui_handle =
        std::thread::spawn(move || run_threaded(ui_args, event_rx, cmd_tx, catalog_tx));

    let res = orchestrator::run_controller(event_tx, cmd_rx).await;

    loader.abort();

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

async fn run_catalog_loader(
    cfg: RunConfig,
    mut rx: UnboundedReceiver<CatalogCommand>,
    event_tx: UnboundedSender<WizardEvent>,
) {
    let client = match PortalClient::new(&cfg) {
        Ok(client) => client,
        Err(e) => {
            let _ = event_tx.send(WizardEvent::Error {
                message: format!("HTTP client init failed: {e}"),
            });
            return;
        }
    };

    while let Some(cmd) = rx.recv().await {
        match cmd {
            CatalogCommand::LoadDatabases => {
                let _ = event_tx.send(WizardEvent::PhaseStarted {
                    phase: WizardPhase::Databases,
                });
                match catalog::load_databases(&client).await {
                    Ok(databases) => {
                        let _ = event_tx.send(WizardEvent::DatabasesLoaded { databases });
                    }
                    Err(e) => {
                        let _ = event_tx.send(WizardEvent::Error {
                            message: format!("Error loading databases: {e}"),
                        });
                    }
                }
            }
            CatalogCommand::LoadForms { database_id } => {
                let _ = event_tx.send(WizardEvent::PhaseStarted {
                    phase: WizardPhase::Forms,
                });
                match catalog::load_forms(&client, &database_id, cfg.rest_forms).await {
                    Ok(list) => {
                        let _ = event_tx.send(WizardEvent::FormsLoaded {
                            forms: list.flattened(),
                        });
                    }
                    Err(e) => {
                        let _ = event_tx.send(WizardEvent::Error {
                            message: format!("Error loading forms: {e}"),
                        });
                    }
                }
            }
        }
    }
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    args: Cli,
    mut event_rx: UnboundedReceiver<WizardEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
    catalog_tx: UnboundedSender<CatalogCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let mut state = UiState {
        base_url: args.base_url.clone(),
        auto_save: args.auto_save,
        ..Default::default()
    };

    if args.load_on_launch {
        state.loading_databases = true;
        let _ = catalog_tx.send(CatalogCommand::LoadDatabases);
    }

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep the UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            match ev {
                WizardEvent::RunCompleted { outcome } => {
                    handle_run_completed(&args, &mut state, *outcome);
                }
                other => apply_event(&mut state, other),
            }
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Char('?')) => {
                        state.show_help = !state.show_help;
                    }
                    (_, KeyCode::Char('p')) => {
                        if state.job_running {
                            state.paused = !state.paused;
                            let _ = cmd_tx.send(UiCommand::Pause(state.paused));
                        }
                    }
                    (_, KeyCode::Char('x')) => {
                        if state.job_running {
                            let _ = cmd_tx.send(UiCommand::Cancel);
                        }
                    }
                    (_, KeyCode::Char('r')) => {
                        reload_databases(&mut state, &catalog_tx);
                    }
                    (_, KeyCode::Char('c')) => {
                        copy_download_url(&mut state);
                    }
                    (_, KeyCode::Char('e')) => {
                        export_outcome(&mut state);
                    }
                    (_, KeyCode::Char('s')) => {
                        start_job(&args, &mut state, &cmd_tx);
                    }
                    (_, KeyCode::Up) => move_cursor(&mut state, -1),
                    (_, KeyCode::Down) => move_cursor(&mut state, 1),
                    (_, KeyCode::Enter) => {
                        confirm_step(&args, &mut state, &cmd_tx, &catalog_tx);
                    }
                    (_, KeyCode::Esc) | (_, KeyCode::Left) => step_back(&mut state),
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

fn apply_event(state: &mut UiState, ev: WizardEvent) {
    match ev {
        WizardEvent::PhaseStarted { .. } => {}
        WizardEvent::DatabasesLoaded { databases } => {
            state.loading_databases = false;
            state.databases_loaded = true;
            state.databases = databases;
            state.db_cursor = 0;
            state.info = format!("{} database(s)", state.databases.len());
        }
        WizardEvent::FormsLoaded { forms } => {
            state.loading_forms = false;
            state.selection.set_forms(forms.clone());
            state.forms = forms;
            state.form_cursor = 0;
            state.step = Step::Forms;
            state.info = format!("{} form(s)", state.forms.len());
        }
        WizardEvent::JobStarted { job_id } => {
            state.info = format!("Export job started: {job_id}");
            state.job_id = Some(job_id);
        }
        WizardEvent::JobProgress {
            state: job_state,
            percent,
        } => {
            state.job_state = Some(job_state);
            state.percent = percent;
        }
        WizardEvent::Info(info) => {
            if matches!(info, InfoEvent::Cancelled) {
                state.job_running = false;
                state.paused = false;
            }
            state.info = info.to_message();
        }
        WizardEvent::Error { message } => {
            state.loading_databases = false;
            state.loading_forms = false;
            state.job_running = false;
            state.paused = false;
            state.error = Some(message);
        }
        // Handled by the caller, which owns the CLI args.
        WizardEvent::RunCompleted { .. } => {}
    }
}

fn handle_run_completed(args: &Cli, state: &mut UiState, outcome: RunOutcome) {
    state.job_running = false;
    state.paused = false;
    state.percent = outcome.percent_complete;
    state.job_state = Some(outcome.state);
    state.error = None;

    let processed = orchestrator::process_run_completion(args, state.auto_save, &outcome);
    let mut notes = Vec::new();
    if let Some(p) = processed.auto_saved_path {
        notes.push(format!("Saved: {}", p.display()));
    }
    notes.extend(processed.export_messages);
    if !notes.is_empty() {
        state.info = notes.join("  ");
    }

    state.outcome = Some(outcome);
}

fn reload_databases(state: &mut UiState, catalog_tx: &UnboundedSender<CatalogCommand>) {
    if state.job_running || state.loading_databases {
        return;
    }
    state.selection = Selection::default();
    state.databases.clear();
    state.databases_loaded = false;
    state.forms.clear();
    state.db_cursor = 0;
    state.form_cursor = 0;
    state.step = Step::Databases;
    state.error = None;
    state.loading_databases = true;
    let _ = catalog_tx.send(CatalogCommand::LoadDatabases);
}

fn move_cursor(state: &mut UiState, delta: isize) {
    let (cursor, len) = match state.step {
        Step::Databases => (&mut state.db_cursor, state.databases.len()),
        Step::Forms => (&mut state.form_cursor, state.forms.len()),
        Step::Format => (&mut state.format_cursor, ExportFormat::ALL.len()),
    };
    if len == 0 {
        return;
    }
    let next = (*cursor as isize + delta).rem_euclid(len as isize);
    *cursor = next as usize;
}

fn confirm_step(
    args: &Cli,
    state: &mut UiState,
    cmd_tx: &UnboundedSender<UiCommand>,
    catalog_tx: &UnboundedSender<CatalogCommand>,
) {
    match state.step {
        Step::Databases => {
            if state.loading_databases {
                return;
            }
            if !state.databases_loaded {
                state.loading_databases = true;
                let _ = catalog_tx.send(CatalogCommand::LoadDatabases);
                return;
            }
            let Some(db) = state.databases.get(state.db_cursor).cloned() else {
                return;
            };
            state.selection.select_database(Some(db.clone()));
            state.forms.clear();
            state.form_cursor = 0;
            state.error = None;
            state.loading_forms = true;
            let _ = catalog_tx.send(CatalogCommand::LoadForms { database_id: db.id });
        }
        Step::Forms => {
            let Some(form_id) = state.forms.get(state.form_cursor).map(|f| f.id.clone()) else {
                return;
            };
            if state.selection.select_form(Some(&form_id)) {
                state.step = Step::Format;
            }
        }
        Step::Format => {
            let format = ExportFormat::ALL[state.format_cursor % ExportFormat::ALL.len()];
            if state.selection.select_format(format) {
                start_job(args, state, cmd_tx);
            }
        }
    }
}

fn step_back(state: &mut UiState) {
    match state.step {
        Step::Format => {
            state.selection.select_form(None);
            state.step = Step::Forms;
        }
        Step::Forms => {
            state.selection.select_database(None);
            state.forms.clear();
            state.form_cursor = 0;
            state.step = Step::Databases;
        }
        Step::Databases => {}
    }
}

fn start_job(args: &Cli, state: &mut UiState, cmd_tx: &UnboundedSender<UiCommand>) {
    // Only one job per wizard instance; an incomplete selection is simply ignored.
    if state.job_running || !state.selection.complete() {
        return;
    }
    let fields = state.selection.fields();
    if fields.form_id.is_empty() {
        return;
    }

    let mut cfg = build_config(args);
    cfg.database_id = Some(fields.database_id).filter(|s| !s.is_empty());
    cfg.database_label = state
        .selection
        .database()
        .map(|d| d.display_label().to_string());
    cfg.form_id = Some(fields.form_id);
    // Pre-resolved selection: the engine skips the catalog phases.
    cfg.form_label = Some(fields.form_label);
    cfg.format = state.selection.format().unwrap_or(ExportFormat::Csv);

    state.job_running = true;
    state.paused = false;
    state.outcome = None;
    state.error = None;
    state.percent = 0;
    state.job_state = None;
    state.job_id = None;
    let _ = cmd_tx.send(UiCommand::Start(Box::new(cfg)));
}

fn copy_download_url(state: &mut UiState) {
    let Some(url) = state
        .outcome
        .as_ref()
        .and_then(|o| o.download_url.clone())
    else {
        state.info = "No download URL to copy".into();
        return;
    };
    match arboard::Clipboard::new().and_then(|mut cb| cb.set_text(url)) {
        Ok(()) => state.info = "Download URL copied".into(),
        Err(e) => state.info = format!("Clipboard failed: {e}"),
    }
}

fn export_outcome(state: &mut UiState) {
    let Some(outcome) = state.outcome.as_ref() else {
        state.info = "No outcome to export".into();
        return;
    };
    let path = std::path::PathBuf::from(format!("activityinfo-export-{}.json", outcome.run_id));
    match crate::storage::export_json(&path, outcome) {
        Ok(()) => state.info = format!("Exported: {}", path.display()),
        Err(e) => state.info = format!("Export failed: {e:#}"),
    }
}

fn draw(area: Rect, f: &mut Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(5),
            Constraint::Length(3),
        ])
        .split(area);

    draw_header(f, chunks[0], state);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(34),
            Constraint::Percentage(33),
            Constraint::Percentage(33),
        ])
        .split(chunks[1]);
    draw_database_list(f, columns[0], state);
    draw_form_list(f, columns[1], state);
    draw_format_list(f, columns[2], state);

    draw_job_area(f, chunks[2], state);
    draw_status_line(f, chunks[3], state);

    if state.show_help {
        help::draw_help(f, area);
    }
}

fn step_block(title: &str, focused: bool) -> Block<'_> {
    let border = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Block::default()
        .borders(Borders::ALL)
        .border_style(border)
        .title(title.to_string())
}

fn draw_header(f: &mut Frame, area: Rect, state: &UiState) {
    let line = Line::from(vec![
        Span::styled(
            "ActivityInfo export",
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(state.base_url.clone(), Style::default().fg(Color::Gray)),
        Span::raw("  press ? for help"),
    ]);
    f.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn draw_database_list(f: &mut Frame, area: Rect, state: &UiState) {
    let block = step_block(" 1. Database ", state.step == Step::Databases);
    if state.loading_databases {
        f.render_widget(Paragraph::new("Loading databases…").block(block), area);
        return;
    }
    if state.databases.is_empty() {
        f.render_widget(
            Paragraph::new("Press Enter to load databases").block(block),
            area,
        );
        return;
    }
    let items: Vec<ListItem> = state
        .databases
        .iter()
        .map(|db| ListItem::new(db.display_label().to_string()))
        .collect();
    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().bg(Color::Blue))
        .highlight_symbol("> ");
    let mut list_state = ListState::default().with_selected(Some(state.db_cursor));
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_form_list(f: &mut Frame, area: Rect, state: &UiState) {
    let block = step_block(" 2. Form ", state.step == Step::Forms);
    if !state.selection.form_step_visible() {
        f.render_widget(
            Paragraph::new("(choose a database first)")
                .style(Style::default().fg(Color::DarkGray))
                .block(block),
            area,
        );
        return;
    }
    if state.loading_forms {
        f.render_widget(Paragraph::new("Loading forms…").block(block), area);
        return;
    }
    let items: Vec<ListItem> = state
        .forms
        .iter()
        .map(|form| ListItem::new(form.display_label().to_string()))
        .collect();
    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().bg(Color::Blue))
        .highlight_symbol("> ");
    let mut list_state = ListState::default().with_selected(Some(state.form_cursor));
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_format_list(f: &mut Frame, area: Rect, state: &UiState) {
    let block = step_block(" 3. Format ", state.step == Step::Format);
    if !state.selection.format_step_visible() {
        f.render_widget(
            Paragraph::new("(choose a form first)")
                .style(Style::default().fg(Color::DarkGray))
                .block(block),
            area,
        );
        return;
    }
    let items: Vec<ListItem> = ExportFormat::ALL
        .iter()
        .map(|fmt| ListItem::new(fmt.as_resource_format()))
        .collect();
    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().bg(Color::Blue))
        .highlight_symbol("> ");
    let mut list_state = ListState::default().with_selected(Some(state.format_cursor));
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_job_area(f: &mut Frame, area: Rect, state: &UiState) {
    let title = match state.job_id.as_deref() {
        Some(id) => format!(" Export job {id} "),
        None => " Export job ".to_string(),
    };
    let block = Block::default().borders(Borders::ALL).title(title);

    if state.job_running {
        let job_state = state
            .job_state
            .map(|s| s.to_string())
            .unwrap_or_else(|| "starting".to_string());
        let label = if state.paused {
            format!("{}% ({job_state}, paused)", state.percent)
        } else {
            format!("{}% ({job_state})", state.percent)
        };
        let gauge = Gauge::default()
            .block(block)
            .gauge_style(Style::default().fg(Color::Cyan))
            .percent(u16::from(state.percent.min(100)))
            .label(label);
        f.render_widget(gauge, area);
        return;
    }

    if let Some(outcome) = state.outcome.as_ref() {
        let mut lines = Vec::new();
        match outcome.download_url.as_deref() {
            Some(url) => lines.push(Line::from(vec![
                Span::styled("Download: ", Style::default().fg(Color::Green)),
                Span::raw(url.to_string()),
            ])),
            None => lines.push(Line::from(Span::styled(
                "Download completed but no download URL provided",
                Style::default().fg(Color::Yellow),
            ))),
        }
        for field in outcome.draft.fields() {
            lines.push(Line::from(format!("{}: {}", field.field, field.value)));
        }
        f.render_widget(Paragraph::new(lines).block(block), area);
        return;
    }

    f.render_widget(
        Paragraph::new("Select a database, form and format, then press s to start")
            .style(Style::default().fg(Color::Gray))
            .block(block),
        area,
    );
}

fn draw_status_line(f: &mut Frame, area: Rect, state: &UiState) {
    let line = match state.error.as_deref() {
        Some(err) => Line::from(Span::styled(
            err.to_string(),
            Style::default().fg(Color::Red),
        )),
        None => Line::from(Span::styled(
            state.info.clone(),
            Style::default().fg(Color::Gray),
        )),
    };
    f.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}
