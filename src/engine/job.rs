//! Job submission and the fixed-interval polling loop.

use crate::client::PortalClient;
use crate::error::WizardError;
use crate::model::{ExportFormat, JobSnapshot, WizardEvent};
use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Parameters for driving one job to a terminal state.
pub(crate) struct PollParams<'a> {
    /// Fixed delay between consecutive status requests.
    pub interval: Duration,
    /// Overall cap on the polling span; exceeded means `Timeout`.
    pub deadline: Duration,
    pub event_tx: &'a mpsc::UnboundedSender<WizardEvent>,
    pub paused: Arc<AtomicBool>,
    pub cancel: Arc<AtomicBool>,
}

/// Start an export job. An empty form id is refused before any request goes
/// out.
pub(crate) async fn submit(
    client: &PortalClient,
    form_id: &str,
    format: ExportFormat,
    event_tx: &mpsc::UnboundedSender<WizardEvent>,
) -> Result<String, WizardError> {
    if form_id.trim().is_empty() {
        return Err(WizardError::MissingSelection("form"));
    }
    let job_id = client.start_export(form_id, format.as_ext()).await?;
    let _ = event_tx.send(WizardEvent::JobStarted {
        job_id: job_id.clone(),
    });
    Ok(job_id)
}

/// Poll the status source until the job reaches a terminal state. Exactly one
/// delayed request follows each non-terminal response; ticks never overlap.
/// Returns `None` when cancelled before reaching a terminal state. Any
/// transport failure, `failed` state, or deadline overrun ends the loop.
pub(crate) async fn poll_to_terminal<F, Fut>(
    mut fetch_status: F,
    params: PollParams<'_>,
) -> Result<Option<JobSnapshot>, WizardError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobSnapshot, WizardError>>,
{
    let PollParams {
        interval,
        deadline,
        event_tx,
        paused,
        cancel,
    } = params;
    let start = Instant::now();

    loop {
        while paused.load(Ordering::Relaxed) && !cancel.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if cancel.load(Ordering::Relaxed) {
            return Ok(None);
        }
        if start.elapsed() >= deadline {
            return Err(WizardError::Timeout(deadline));
        }

        let snapshot = fetch_status().await?;
        let _ = event_tx.send(WizardEvent::JobProgress {
            state: snapshot.state,
            percent: snapshot.percent_complete,
        });

        match snapshot.state {
            crate::model::JobState::Completed => return Ok(Some(snapshot)),
            crate::model::JobState::Failed => {
                let message = snapshot
                    .error
                    .unwrap_or_else(|| "export job failed on the server".to_string());
                return Err(WizardError::JobFailed(message));
            }
            _ => {}
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobState, RunConfig};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn snapshot(state: JobState, percent: u8, url: Option<&str>) -> JobSnapshot {
        JobSnapshot {
            state,
            percent_complete: percent,
            download_url: url.map(str::to_string),
            error: None,
        }
    }

    struct ScriptedStatus {
        responses: Mutex<VecDeque<JobSnapshot>>,
        requests: AtomicUsize,
    }

    impl ScriptedStatus {
        fn new(responses: Vec<JobSnapshot>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: AtomicUsize::new(0),
            })
        }

        fn next(&self) -> Result<JobSnapshot, WizardError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .expect("poisoned")
                .pop_front()
                .ok_or_else(|| WizardError::Api("script exhausted".to_string()))
        }

        fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    fn params(
        event_tx: &mpsc::UnboundedSender<WizardEvent>,
        cancel: Arc<AtomicBool>,
    ) -> PollParams<'_> {
        PollParams {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(300),
            event_tx,
            paused: Arc::new(AtomicBool::new(false)),
            cancel,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completed_sequence_issues_exactly_two_delayed_polls() {
        let script = ScriptedStatus::new(vec![
            snapshot(JobState::Running, 10, None),
            snapshot(JobState::Running, 55, None),
            snapshot(JobState::Completed, 100, Some("https://x/dl/f1.csv")),
        ]);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let fetch = {
            let script = script.clone();
            move || {
                let script = script.clone();
                async move { script.next() }
            }
        };
        let result = poll_to_terminal(fetch, params(&event_tx, cancel))
            .await
            .expect("poll")
            .expect("terminal snapshot");

        assert_eq!(script.request_count(), 3);
        assert_eq!(result.download_url.as_deref(), Some("https://x/dl/f1.csv"));

        let mut percents = Vec::new();
        while let Ok(ev) = event_rx.try_recv() {
            if let WizardEvent::JobProgress { percent, .. } = ev {
                percents.push(percent);
            }
        }
        assert_eq!(percents, [10, 55, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_state_stops_immediately() {
        let script = ScriptedStatus::new(vec![
            snapshot(JobState::Running, 10, None),
            JobSnapshot {
                state: JobState::Failed,
                percent_complete: 10,
                download_url: None,
                error: Some("disk full".to_string()),
            },
            snapshot(JobState::Running, 99, None),
        ]);
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let fetch = {
            let script = script.clone();
            move || {
                let script = script.clone();
                async move { script.next() }
            }
        };
        let err = poll_to_terminal(fetch, params(&event_tx, cancel))
            .await
            .expect_err("failed job");

        // No request beyond the failing one.
        assert_eq!(script.request_count(), 2);
        match err {
            WizardError::JobFailed(msg) => assert_eq!(msg, "disk full"),
            other => panic!("expected JobFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_mid_poll_is_terminal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = {
            let calls = calls.clone();
            move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok(snapshot(JobState::Running, 5, None))
                    } else {
                        Err(WizardError::Api("status route gone".to_string()))
                    }
                }
            }
        };
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let err = poll_to_terminal(fetch, params(&event_tx, cancel))
            .await
            .expect_err("poll error");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, WizardError::Api(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_between_polls_issues_no_further_request() {
        let script = ScriptedStatus::new(vec![
            snapshot(JobState::Running, 10, None),
            snapshot(JobState::Running, 55, None),
        ]);
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let fetch = {
            let script = script.clone();
            let cancel = cancel.clone();
            move || {
                let script = script.clone();
                // Flip the flag right after the first response is served.
                cancel.store(true, Ordering::Relaxed);
                async move { script.next() }
            }
        };
        let result = poll_to_terminal(fetch, params(&event_tx, cancel))
            .await
            .expect("poll");

        assert!(result.is_none());
        assert_eq!(script.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_terminal_job_hits_the_deadline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = {
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(snapshot(JobState::Unknown, 0, None)) }
            }
        };
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let params = PollParams {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(5),
            event_tx: &event_tx,
            paused: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
        };

        let err = poll_to_terminal(fetch, params).await.expect_err("deadline");
        assert!(matches!(err, WizardError::Timeout(_)));
        // Requests go out at 0s, 2s, 4s; at 6s the deadline check fires first.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_form_id_never_issues_a_request() {
        // Unroutable base URL: any attempted request would surface as Transport.
        let cfg = RunConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            route_prefix: "activity-info".to_string(),
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
            request_timeout: Duration::from_secs(1),
            job_timeout: Duration::from_secs(5),
            csrf_token: None,
            cookie_header: None,
            csrf_cookie_name: "csrf_token".to_string(),
            user_agent: "test".to_string(),
            effects: Default::default(),
            resource_name: None,
        };
        let client = PortalClient::new(&cfg).expect("client");
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let err = submit(&client, "  ", ExportFormat::Csv, &event_tx)
            .await
            .expect_err("refusal");
        assert!(matches!(err, WizardError::MissingSelection("form")));
        assert!(event_rx.try_recv().is_err());
    }
}
