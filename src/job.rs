//! Remedial jobs and their outcomes.
//!
//! A `Job` exists only between a successful submission and the moment its outcome is known.
//! It is then folded into a `JobReport` and dropped; nothing about it outlives the pass.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::CacheWardenError;

/// Terminal state of one remedial job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "kebab-case")]
pub enum JobOutcome {
    Success,
    Failed(String),
    TimedOut,
    SubmissionError(String),
    /// A job left running at an earlier deadline is still queued, so nothing was submitted.
    StillRunning,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobOutcome::Success => "success",
            JobOutcome::Failed(_) => "failed",
            JobOutcome::TimedOut => "timed-out",
            JobOutcome::SubmissionError(_) => "submission-error",
            JobOutcome::StillRunning => "still-running",
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Failed(reason) | JobOutcome::SubmissionError(reason) => {
                write!(f, "{}({})", self.kind(), reason)
            }
            _ => f.write_str(self.kind()),
        }
    }
}

/// A submission the server accepted and assigned an identifier to.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: String) -> Self {
        Self {
            id,
            submitted_at: Utc::now(),
        }
    }

    pub fn finish(self, outcome: JobOutcome) -> JobReport {
        JobReport {
            job_id: Some(self.id),
            submitted_at: Some(self.submitted_at),
            outcome,
        }
    }
}

/// What the reconciler records about the job it ran, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// Absent when the submission itself failed.
    pub job_id: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

impl JobReport {
    pub fn submission_error(reason: String) -> Self {
        Self {
            job_id: None,
            submitted_at: None,
            outcome: JobOutcome::SubmissionError(reason),
        }
    }

    pub fn still_running(job_id: String) -> Self {
        Self {
            job_id: Some(job_id),
            submitted_at: None,
            outcome: JobOutcome::StillRunning,
        }
    }
}

/// The fixed workflow payload, loaded once and shared read-only by every reconciler.
///
/// A failed load is kept rather than aborting startup: each submission then reports the
/// load failure as its submission error.
#[derive(Debug, Clone)]
pub struct Workflow(Arc<Result<Value, String>>);

impl Workflow {
    pub fn load(path: &Path) -> Self {
        let loaded = std::fs::read_to_string(path)
            .map_err(CacheWardenError::from)
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(CacheWardenError::from))
            .map_err(|e| format!("{}: {}", path.display(), e));
        match &loaded {
            Ok(_) => tracing::info!(path = %path.display(), "workflow loaded"),
            Err(reason) => tracing::error!(%reason, "failed to load workflow"),
        }
        Self(Arc::new(loaded))
    }

    pub fn from_value(value: Value) -> Self {
        Self(Arc::new(Ok(value)))
    }

    pub fn payload(&self) -> Result<&Value, CacheWardenError> {
        (*self.0)
            .as_ref()
            .map_err(|reason| CacheWardenError::WorkflowUnavailable(reason.clone()))
    }

    pub fn is_loaded(&self) -> bool {
        self.0.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_outcome_display() {
        assert_eq!(JobOutcome::Success.to_string(), "success");
        assert_eq!(JobOutcome::TimedOut.to_string(), "timed-out");
        assert_eq!(
            JobOutcome::Failed("节点 7: OOM".into()).to_string(),
            "failed(节点 7: OOM)"
        );
    }

    #[test]
    fn test_report_serializes_flat() {
        let report = JobReport::submission_error("HTTP 500: boom".into());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "submission-error");
        assert_eq!(json["reason"], "HTTP 500: boom");
        assert!(json["job_id"].is_null());

        let done = Job::new("j-1".into()).finish(JobOutcome::Success);
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["job_id"], "j-1");
    }

    #[test]
    fn test_workflow_load_success() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"3": {"class_type": "KSampler"}}"#).unwrap();
        let workflow = Workflow::load(file.path());
        assert!(workflow.is_loaded());
        assert_eq!(workflow.payload().unwrap()["3"]["class_type"], "KSampler");
    }

    #[test]
    fn test_workflow_load_failure_is_deferred() {
        let workflow = Workflow::load(Path::new("/nonexistent/workflow.json"));
        assert!(!workflow.is_loaded());
        assert!(matches!(
            workflow.payload(),
            Err(CacheWardenError::WorkflowUnavailable(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{not json").unwrap();
        assert!(!Workflow::load(file.path()).is_loaded());
    }
}
