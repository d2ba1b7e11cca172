//! Per-server reconciliation: probe, then submit and wait if the cache is missing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::job::{JobOutcome, JobReport, Workflow};
use crate::probe::{probe, Readiness};
use crate::server::Server;
use crate::session::Session;
use crate::submit::submit;
use crate::wait::{wait_for_job, WaitPolicy};

/// What one reconciliation of one server observed and did.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    /// Position of the server in the configured list.
    pub index: usize,
    pub server: Server,
    pub readiness: Readiness,
    /// Present only when the server was not ready and a job was attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobReport>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl ReconciliationResult {
    /// Stands in for the result of a reconciliation task that panicked.
    pub fn crashed(index: usize, server: Server, started_at: DateTime<Utc>, reason: String) -> Self {
        Self {
            index,
            server,
            readiness: Readiness::NotReady,
            job: Some(JobReport {
                job_id: None,
                submitted_at: None,
                outcome: JobOutcome::Failed(format!("reconciliation task died: {}", reason)),
            }),
            started_at,
            elapsed_ms: (Utc::now() - started_at).num_milliseconds().max(0) as u64,
        }
    }

    /// True when a job was attempted and did not succeed.
    pub fn is_failure(&self) -> bool {
        self.job
            .as_ref()
            .is_some_and(|job| !job.outcome.is_success())
    }
}

/// Everything a reconciliation needs besides the session. Cheap to clone into tasks.
///
/// Clones share the record of jobs that were still running when their wait deadline hit,
/// keyed by server index.
#[derive(Debug, Clone)]
pub struct Reconciler {
    workflow: Workflow,
    ready_marker: Arc<str>,
    wait: WaitPolicy,
    outstanding: Arc<Mutex<HashMap<usize, String>>>,
}

impl Reconciler {
    pub fn new(workflow: Workflow, ready_marker: &str, wait: WaitPolicy) -> Self {
        Self {
            workflow,
            ready_marker: ready_marker.into(),
            wait,
            outstanding: Arc::default(),
        }
    }

    /// Job left running on server `index` at an earlier deadline, if any.
    pub fn outstanding_job(&self, index: usize) -> Option<String> {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .cloned()
    }

    fn remember(&self, index: usize, job_id: String) {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, job_id);
    }

    fn forget(&self, index: usize) {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&index);
    }

    /// Returns the id of an earlier job that is still queued on the server, in which case
    /// nothing new may be submitted.
    ///
    /// An unreadable queue counts as still queued.
    async fn still_queued(&self, index: usize, session: &dyn Session) -> Option<String> {
        let job_id = self.outstanding_job(index)?;
        let server = session.server().label();
        match session.queue().await {
            Ok(snapshot) if snapshot.contains(&job_id) => {
                info!(%server, %job_id, "earlier cache workflow still queued, not submitting again");
                Some(job_id)
            }
            Ok(_) => {
                info!(%server, %job_id, "earlier cache workflow left the queue");
                self.forget(index);
                None
            }
            Err(e) => {
                warn!(%server, %job_id, error = %e, "queue unreadable, not submitting again");
                Some(job_id)
            }
        }
    }

    async fn run_job(
        &self,
        index: usize,
        session: &dyn Session,
        cancel: &CancellationToken,
    ) -> JobReport {
        match submit(session, &self.workflow).await {
            Ok(job) => {
                let outcome = wait_for_job(session, &job.id, &self.wait, cancel).await;
                if outcome == JobOutcome::TimedOut {
                    self.remember(index, job.id.clone());
                }
                job.finish(outcome)
            }
            Err(reason) => JobReport::submission_error(reason),
        }
    }

    pub fn ready_marker(&self) -> &str {
        &self.ready_marker
    }

    pub async fn readiness(&self, session: &dyn Session) -> Readiness {
        probe(session, &self.ready_marker).await
    }

    /// Probe → submit → wait, strictly in that order, for the server behind `session`.
    ///
    /// A job that outlived its deadline on an earlier call is looked up in the queue before
    /// submitting; while it is still queued no second job is submitted.
    /// Never fails: every problem ends up in the returned result.
    pub async fn reconcile(
        &self,
        index: usize,
        session: &dyn Session,
        cancel: &CancellationToken,
    ) -> ReconciliationResult {
        let server = session.server();
        let started_at = Utc::now();
        let started = Instant::now();
        info!(server = %server.label(), index, "checking cache");

        let readiness = self.readiness(session).await;
        let job = if readiness.is_ready() {
            info!(server = %server.label(), "cache loaded, nothing to do");
            self.forget(index);
            None
        } else if let Some(job_id) = self.still_queued(index, session).await {
            Some(JobReport::still_running(job_id))
        } else {
            info!(server = %server.label(), "cache missing, running cache workflow");
            Some(self.run_job(index, session, cancel).await)
        };

        let result = ReconciliationResult {
            index,
            server: server.clone(),
            readiness,
            job,
            started_at,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        match &result.job {
            Some(job) if !job.outcome.is_success() => {
                error!(server = %server.label(), outcome = %job.outcome, "cache workflow failed")
            }
            Some(job) => info!(server = %server.label(), outcome = %job.outcome, "cache workflow finished"),
            None => {}
        }
        result
    }
}
