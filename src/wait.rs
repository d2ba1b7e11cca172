//! Waiting for a submitted job to finish.
//!
//! ComfyUI has no completion callback, so the waiter polls the queue until the job is gone
//! and then reads its history record. It never cancels anything remotely: hitting the
//! deadline or being cancelled only stops the local observation.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job::JobOutcome;
use crate::session::Session;

#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    /// How long to observe the job before giving up with `TimedOut`.
    pub deadline: Duration,
    /// Spacing between queue polls.
    pub poll_interval: Duration,
    /// Consecutive polls a job may be missing from both the queue and the history after
    /// having been seen enqueued, before it is declared lost.
    pub vanish_grace: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            vanish_grace: 3,
        }
    }
}

/// Observes `job_id` on the session's server until it finishes, the deadline passes, or
/// `cancel` fires.
///
/// The deadline is checked between polls. Each request is bounded by the session's own
/// timeout, so a history fetch already under way when the deadline hits still decides the
/// outcome.
pub async fn wait_for_job(
    session: &dyn Session,
    job_id: &str,
    policy: &WaitPolicy,
    cancel: &CancellationToken,
) -> JobOutcome {
    tokio::select! {
        outcome = observe(session, job_id, policy) => outcome,
        _ = cancel.cancelled() => {
            info!(server = %session.server().label(), %job_id, "wait cancelled, job left running remotely");
            JobOutcome::TimedOut
        }
    }
}

async fn observe(session: &dyn Session, job_id: &str, policy: &WaitPolicy) -> JobOutcome {
    let server = session.server().label();
    let deadline = Instant::now() + policy.deadline;
    // A fresh submission may not be visible in the queue yet. Its absence only means
    // "finished" once it was seen enqueued or once a history record exists.
    let mut seen = false;
    let mut missing_polls = 0;

    loop {
        match session.queue().await {
            Ok(snapshot) if snapshot.contains(job_id) => {
                if !seen {
                    debug!(%server, %job_id, "job observed in queue");
                }
                seen = true;
                missing_polls = 0;
            }
            Ok(_) => match session.history(job_id).await {
                Ok(Some(record)) => {
                    return if record.is_success() {
                        JobOutcome::Success
                    } else {
                        JobOutcome::Failed(record.failure_reason())
                    };
                }
                Ok(None) if seen => {
                    missing_polls += 1;
                    if missing_polls >= policy.vanish_grace {
                        return JobOutcome::Failed(
                            "job left the queue without a history record".to_string(),
                        );
                    }
                }
                Ok(None) => debug!(%server, %job_id, "job not enqueued yet"),
                Err(e) => warn!(%server, %job_id, error = %e, "history fetch failed, retrying"),
            },
            Err(e) => warn!(%server, %job_id, error = %e, "queue poll failed, retrying"),
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(%server, %job_id, deadline = ?policy.deadline, "job still queued at deadline, no longer observing");
            return JobOutcome::TimedOut;
        }
        // The last poll lands exactly on the deadline.
        tokio::time::sleep_until((now + policy.poll_interval).min(deadline)).await;
    }
}
