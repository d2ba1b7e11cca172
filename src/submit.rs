//! Workflow submission.

use tracing::{error, info};

use crate::job::{Job, Workflow};
use crate::session::Session;

/// Enqueues the remedial workflow on one server.
///
/// On failure the returned reason carries whatever the server or transport said, including
/// the HTTP status and body for rejected submissions.
pub async fn submit(session: &dyn Session, workflow: &Workflow) -> Result<Job, String> {
    let server = session.server();
    let result = match workflow.payload() {
        Ok(payload) => session.submit(payload).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(job_id) => {
            info!(server = %server.label(), %job_id, "workflow submitted");
            Ok(Job::new(job_id))
        }
        Err(e) => {
            error!(server = %server.label(), error = %e, "workflow submission failed");
            Err(e.to_string())
        }
    }
}
