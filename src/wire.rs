//! The ComfyUI wire contract.
//!
//! Only the handful of fields the reconciler depends on are read; everything else in the
//! responses is ignored so that unrelated server upgrades don't break parsing.

use serde::Deserialize;
use serde_json::Value;

/// Readiness endpoint of the cache node pack.
pub const DETERMINE_PATH: &str = "/inspire/cache/determine";
/// Submission (POST) and queue listing (GET).
pub const QUEUE_PATH: &str = "/api/queue";
/// Execution history, followed by `/{job_id}`.
pub const HISTORY_PATH: &str = "/api/history";

/// Text the readiness endpoint returns once the cache is resident.
pub const DEFAULT_READY_MARKER: &str = "缓存已加载";

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    prompt_id: Option<String>,
}

/// Extracts the job identifier from a successful submission response body.
pub fn parse_job_id(body: &str) -> Option<String> {
    serde_json::from_str::<SubmitResponse>(body)
        .ok()
        .and_then(|resp| resp.prompt_id)
        .filter(|id| !id.is_empty())
}

/// A snapshot of one server's execution queue.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub running: Vec<String>,
    pub pending: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    #[serde(default)]
    queue_running: Vec<Value>,
    #[serde(default)]
    queue_pending: Vec<Value>,
}

impl QueueSnapshot {
    pub fn parse(body: &Value) -> Result<Self, serde_json::Error> {
        let resp = QueueResponse::deserialize(body)?;
        Ok(Self {
            running: resp.queue_running.iter().filter_map(entry_job_id).collect(),
            pending: resp.queue_pending.iter().filter_map(entry_job_id).collect(),
        })
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.running.iter().chain(self.pending.iter()).any(|id| id == job_id)
    }
}

/// Queue entries are `[number, job_id, prompt, extra_data, outputs]`.
fn entry_job_id(entry: &Value) -> Option<String> {
    entry.get(1).and_then(Value::as_str).map(str::to_owned)
}

/// One job's record from the history endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord(Value);

impl HistoryRecord {
    /// Picks the record for `job_id` out of a history response, if the server has one yet.
    pub fn from_response(body: Value, job_id: &str) -> Option<Self> {
        match body {
            Value::Object(mut map) => map.remove(job_id).map(Self),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<&Value> {
        self.0.get("status")
    }

    pub fn is_success(&self) -> bool {
        self.status()
            .and_then(|status| status.get("status_str"))
            .and_then(Value::as_str)
            == Some("success")
    }

    /// Describes why the job failed.
    ///
    /// Every step-level error is rendered as `node <id>: <message>`, with the extended
    /// diagnostic text appended in parentheses when the server sent one. Without any
    /// step-level error the raw status object is returned instead.
    pub fn failure_reason(&self) -> String {
        let errors = self.step_errors();
        if !errors.is_empty() {
            return errors
                .iter()
                .map(StepError::to_string)
                .collect::<Vec<_>>()
                .join("; ");
        }
        match self.status() {
            Some(status) => status.to_string(),
            None => "job finished without a status".to_string(),
        }
    }

    fn step_errors(&self) -> Vec<StepError> {
        let mut errors = vec![];

        // Execution errors reported through the status message log.
        let messages = self
            .status()
            .and_then(|status| status.get("messages"))
            .and_then(Value::as_array);
        for message in messages.into_iter().flatten() {
            let kind = message.get(0).and_then(Value::as_str);
            if kind != Some("execution_error") {
                continue;
            }
            if let Some(detail) = message.get(1) {
                errors.push(StepError {
                    node: value_text(detail.get("node_id")).unwrap_or_else(|| "?".into()),
                    message: value_text(detail.get("exception_message"))
                        .unwrap_or_else(|| "unknown error".into()),
                    details: value_text(detail.get("traceback")),
                });
            }
        }

        // Errors attached to individual node outputs.
        if let Some(outputs) = self.0.get("outputs").and_then(Value::as_object) {
            for (node, output) in outputs {
                let Some(error) = output.get("error") else {
                    continue;
                };
                let (message, details) = match error {
                    Value::Object(_) => (
                        value_text(error.get("message")).unwrap_or_else(|| error.to_string()),
                        value_text(error.get("details")).or_else(|| value_text(error.get("traceback"))),
                    ),
                    other => (value_text(Some(other)).unwrap_or_default(), None),
                };
                errors.push(StepError {
                    node: node.clone(),
                    message,
                    details,
                });
            }
        }

        errors
    }
}

struct StepError {
    node: String,
    message: String,
    details: Option<String>,
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "节点 {}: {}", self.node, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Renders a JSON scalar or array of lines as plain text. Empty text counts as absent.
fn value_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Array(lines) => lines
            .iter()
            .map(|line| match line {
                Value::String(s) => s.trim_end().to_string(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}
