//! Export-run lifecycle controller.
//!
//! Owns start/cancel/quit orchestration and emits events for presentation
//! layers. Only one job is ever in flight: starting a new run while one is
//! active cancels the active run first and spawns the replacement only once
//! completion is observed.

use crate::engine::{EngineControl, ExportEngine};
use crate::error::WizardError;
use crate::model::{InfoEvent, RunConfig, RunOutcome, WizardEvent};
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;

/// Commands emitted by UI layers to control export runs.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start(Box<RunConfig>),
    Pause(bool),
    Cancel,
    Quit,
}

/// Internal handle for a running export task.
struct RunCtx {
    ctrl_tx: UnboundedSender<EngineControl>,
    handle: Option<tokio::task::JoinHandle<Result<RunOutcome, WizardError>>>,
}

/// Spawn a new export run and return its control handle.
fn start_run(cfg: RunConfig, event_tx: UnboundedSender<WizardEvent>) -> RunCtx {
    let (ctrl_tx, ctrl_rx) = tokio::sync::mpsc::unbounded_channel::<EngineControl>();
    let engine = ExportEngine::new(cfg);
    let handle = tokio::spawn(async move { engine.run(event_tx, ctrl_rx).await });
    RunCtx {
        ctrl_tx,
        handle: Some(handle),
    }
}

/// Orchestrate export runs based on UI commands and emit events back to
/// presentation layers.
pub(crate) async fn run_controller(
    event_tx: UnboundedSender<WizardEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut run_ctx: Option<RunCtx> = None;
    let mut pending_start: Option<RunConfig> = None;
    let mut quit_pending = false;
    // Cancel watchdog: if a cancel takes too long, emit a status message to keep UI feedback alive.
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Start(cfg)) => {
                        // Starts are serialized: cancel the active run first, then start the
                        // replacement once we observe completion. This avoids overlapping jobs
                        // and closes the superseded-poll leak.
                        if let Some(ctx) = &run_ctx {
                            pending_start = Some(*cfg);
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                            let _ = event_tx.send(WizardEvent::Info(InfoEvent::Message(
                                "Cancelling…".into(),
                            )));
                            cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        } else {
                            run_ctx = Some(start_run(*cfg, event_tx.clone()));
                        }
                    }
                    Some(UiCommand::Pause(p)) => {
                        if let Some(ctx) = &run_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Pause(p));
                        }
                    }
                    Some(UiCommand::Cancel) => {
                        pending_start = None;
                        if let Some(ctx) = &run_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                            let _ = event_tx.send(WizardEvent::Info(InfoEvent::Message(
                                "Cancelling…".into(),
                            )));
                            cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        }
                    }
                    Some(UiCommand::Quit) => {
                        // Quit waits for the current run to finish so we can cleanly finalize UI state.
                        quit_pending = true;
                        pending_start = None;
                        if let Some(ctx) = &run_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                            cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        } else {
                            break Ok(());
                        }
                    }
                    None => {
                        quit_pending = true;
                        if let Some(ctx) = &run_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                        } else {
                            break Ok(());
                        }
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be dropped
            // if another select branch is chosen, and we'll never observe completion.
            maybe_done = async {
                if let Some(ctx) = &mut run_ctx {
                    if let Some(h) = ctx.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                if let Some(join_res) = maybe_done {
                    if let Some(ctx) = &mut run_ctx {
                        ctx.handle.take();
                    }
                    match join_res {
                        Ok(Ok(outcome)) => {
                            let _ = event_tx.send(WizardEvent::RunCompleted { outcome: Box::new(outcome) });
                        }
                        Ok(Err(WizardError::Cancelled)) => {
                            // The engine already announced the cancellation.
                        }
                        Ok(Err(e)) => {
                            let _ = event_tx.send(WizardEvent::Error {
                                message: format!("Export failed: {e}"),
                            });
                        }
                        Err(e) => {
                            let _ = event_tx.send(WizardEvent::Error {
                                message: format!("Export join failed: {e}"),
                            });
                        }
                    }
                    run_ctx = None;
                    cancel_deadline = None;
                    if quit_pending {
                        break Ok(());
                    }
                    if let Some(cfg) = pending_start.take() {
                        run_ctx = Some(start_run(cfg, event_tx.clone()));
                    }
                }
            }
            // If cancel stalls (e.g., a status request in flight), keep the user informed.
            _ = watchdog.tick() => {
                if let Some(deadline) = cancel_deadline {
                    if tokio::time::Instant::now() >= deadline && run_ctx.is_some() {
                        let _ = event_tx.send(WizardEvent::Info(InfoEvent::Message(
                            "Still cancelling…".into(),
                        )));
                        cancel_deadline = None;
                    }
                }
            }
        }
    }
}
