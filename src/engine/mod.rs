pub mod catalog;
mod job;

use crate::apply::{self, CompletionContext, ResourceDraft};
use crate::client::{self, PortalClient};
use crate::error::WizardError;
use crate::model::{InfoEvent, JobSnapshot, RunConfig, RunOutcome, WizardEvent, WizardPhase};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Pause (true) or resume (false) the polling loop
    Pause(bool),
    /// Cancel the run entirely
    Cancel,
}

pub struct ExportEngine {
    cfg: RunConfig,
}

impl ExportEngine {
    pub fn new(cfg: RunConfig) -> Self {
        Self { cfg }
    }

    /// Drive one export from selection resolution to a terminal job state.
    ///
    /// With `form_label` pre-set in the config the catalog phases are skipped
    /// and the job is submitted directly; otherwise the database and form ids
    /// are resolved against the live listings first.
    pub async fn run(
        self,
        event_tx: mpsc::UnboundedSender<WizardEvent>,
        mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> Result<RunOutcome, WizardError> {
        let client = PortalClient::new(&self.cfg)?;
        if let Some((_, source)) = client::resolve_csrf_token(&self.cfg) {
            let _ = event_tx.send(WizardEvent::Info(InfoEvent::CsrfToken { source }));
        }

        let paused = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(AtomicBool::new(false));

        // Control listener.
        let paused2 = paused.clone();
        let cancel2 = cancel.clone();
        let control_handle = tokio::spawn(async move {
            while let Some(msg) = control_rx.recv().await {
                match msg {
                    EngineControl::Pause(p) => paused2.store(p, Ordering::Relaxed),
                    EngineControl::Cancel => {
                        cancel2.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
        });

        let result = self
            .run_inner(&client, &event_tx, paused, cancel)
            .await;

        // Abort the control listener before returning. Dropping a JoinHandle
        // does NOT cancel the task; it would sit on control_rx.recv() forever.
        control_handle.abort();

        result
    }

    async fn run_inner(
        &self,
        client: &PortalClient,
        event_tx: &mpsc::UnboundedSender<WizardEvent>,
        paused: Arc<AtomicBool>,
        cancel: Arc<AtomicBool>,
    ) -> Result<RunOutcome, WizardError> {
        let started = tokio::time::Instant::now();

        let form_id = self
            .cfg
            .form_id
            .clone()
            .ok_or(WizardError::MissingSelection("form"))?;

        let (database_id, database_label, form_label) = if let Some(label) =
            self.cfg.form_label.clone()
        {
            // Pre-resolved selection: no catalog round-trips.
            (
                self.cfg.database_id.clone().unwrap_or_default(),
                self.cfg.database_label.clone(),
                Some(label),
            )
        } else {
            let database_id = self
                .cfg
                .database_id
                .clone()
                .ok_or(WizardError::MissingSelection("database"))?;

            let _ = event_tx.send(WizardEvent::PhaseStarted {
                phase: WizardPhase::Databases,
            });
            let databases = catalog::load_databases(client).await?;
            let _ = event_tx.send(WizardEvent::DatabasesLoaded {
                databases: databases.clone(),
            });
            let database = databases
                .into_iter()
                .find(|d| d.id == database_id)
                .ok_or_else(|| WizardError::InvalidSelection {
                    kind: "database",
                    id: database_id.clone(),
                })?;

            let _ = event_tx.send(WizardEvent::PhaseStarted {
                phase: WizardPhase::Forms,
            });
            let forms = catalog::load_forms(client, &database.id, self.cfg.rest_forms)
                .await?
                .flattened();
            let _ = event_tx.send(WizardEvent::FormsLoaded {
                forms: forms.clone(),
            });
            let form = forms
                .into_iter()
                .find(|f| f.id == form_id)
                .ok_or_else(|| WizardError::InvalidSelection {
                    kind: "form",
                    id: form_id.clone(),
                })?;

            (
                database.id.clone(),
                Some(database.display_label().to_string()),
                Some(form.display_label().to_string()),
            )
        };

        if cancel.load(Ordering::Relaxed) {
            let _ = event_tx.send(WizardEvent::Info(InfoEvent::Cancelled));
            return Err(WizardError::Cancelled);
        }

        let _ = event_tx.send(WizardEvent::PhaseStarted {
            phase: WizardPhase::Submit,
        });
        let job_id = job::submit(client, &form_id, self.cfg.format, event_tx).await?;

        let _ = event_tx.send(WizardEvent::PhaseStarted {
            phase: WizardPhase::Poll,
        });
        let snapshot = job::poll_to_terminal(
            || client.fetch_job_status(&job_id),
            job::PollParams {
                interval: self.cfg.poll_interval,
                deadline: self.cfg.job_timeout,
                event_tx,
                paused,
                cancel,
            },
        )
        .await?;

        let Some(snapshot) = snapshot else {
            let _ = event_tx.send(WizardEvent::Info(InfoEvent::Cancelled));
            return Err(WizardError::Cancelled);
        };

        let _ = event_tx.send(WizardEvent::PhaseStarted {
            phase: WizardPhase::Summary,
        });
        Ok(self.build_outcome(
            started.elapsed().as_millis() as u64,
            database_id,
            database_label,
            form_id,
            form_label,
            job_id,
            snapshot,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_outcome(
        &self,
        elapsed_ms: u64,
        database_id: String,
        database_label: Option<String>,
        form_id: String,
        form_label: Option<String>,
        job_id: String,
        snapshot: JobSnapshot,
    ) -> RunOutcome {
        let mut draft = ResourceDraft::default();
        if let (Some(field), Some(name)) = (
            self.cfg.effects.name_field.as_deref(),
            self.cfg.resource_name.as_deref(),
        ) {
            draft.set(field, name);
        }

        let label_for_draft = form_label.clone().unwrap_or_else(|| form_id.clone());
        let description = apply::describe_selection(
            database_label.as_deref().unwrap_or(""),
            &label_for_draft,
        );
        let changed_fields = apply::apply_completion(
            &self.cfg.effects,
            &CompletionContext {
                download_url: snapshot.download_url.as_deref(),
                form_label: &label_for_draft,
                format: self.cfg.format,
                description: &description,
            },
            &mut draft,
        );

        RunOutcome {
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            base_url: self.cfg.base_url.clone(),
            run_id: self.cfg.run_id.clone(),
            comments: self.cfg.comments.clone(),
            database_id,
            database_label,
            form_id,
            form_label,
            format: self.cfg.format,
            job_id,
            state: snapshot.state,
            percent_complete: snapshot.percent_complete,
            download_url: snapshot.download_url,
            elapsed_ms,
            draft,
            changed_fields,
        }
    }
}
