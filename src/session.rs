//! HTTP session with one ComfyUI server.
//!
//! The `Session` trait is the seam between the reconciler and the network. Each call is
//! bounded by its own timeout and reports transport errors and non-success statuses as
//! `CacheWardenError`s; deciding what those mean is left to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};

use crate::error::CacheWardenError;
use crate::server::Server;
use crate::wire::{self, HistoryRecord, QueueSnapshot};

#[async_trait]
pub trait Session: Send + Sync {
    fn server(&self) -> &Server;

    /// Body of the readiness endpoint. Non-success statuses are errors.
    async fn determine(&self) -> Result<String, CacheWardenError>;

    /// Enqueues the workflow and returns the job identifier the server assigned.
    async fn submit(&self, workflow: &Value) -> Result<String, CacheWardenError>;

    async fn queue(&self) -> Result<QueueSnapshot, CacheWardenError>;

    /// The history record for `job_id`, or `None` if the server has none (yet).
    async fn history(&self, job_id: &str) -> Result<Option<HistoryRecord>, CacheWardenError>;
}

/// Per-request time bounds.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Readiness checks, queue polls and history fetches.
    pub probe: Duration,
    /// Workflow submission, which the server may be slow to accept.
    pub submit: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(10),
            submit: Duration::from_secs(30),
        }
    }
}

pub struct HttpSession {
    server: Server,
    client: Client,
    timeouts: Timeouts,
}

impl HttpSession {
    pub fn new(server: Server, client: Client, timeouts: Timeouts) -> Self {
        Self {
            server,
            client,
            timeouts,
        }
    }

    /// One session per server, all sharing a single connection pool.
    pub fn for_fleet(
        servers: Vec<Server>,
        timeouts: Timeouts,
    ) -> Result<Vec<Arc<dyn Session>>, CacheWardenError> {
        let client = Client::builder()
            .connect_timeout(timeouts.probe)
            .build()?;
        Ok(servers
            .into_iter()
            .map(|server| {
                Arc::new(HttpSession::new(server, client.clone(), timeouts)) as Arc<dyn Session>
            })
            .collect())
    }

    async fn get(&self, url: String) -> Result<Response, CacheWardenError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeouts.probe)
            .send()
            .await?;
        require_status(response, |status| status.is_success()).await
    }
}

/// Turns a response whose status fails `accept` into `BadStatus`, keeping the body.
async fn require_status(
    response: Response,
    accept: impl Fn(StatusCode) -> bool,
) -> Result<Response, CacheWardenError> {
    let status = response.status();
    if accept(status) {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CacheWardenError::BadStatus {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Session for HttpSession {
    fn server(&self) -> &Server {
        &self.server
    }

    async fn determine(&self) -> Result<String, CacheWardenError> {
        let response = self.get(self.server.endpoint(wire::DETERMINE_PATH)).await?;
        Ok(response.text().await?)
    }

    async fn submit(&self, workflow: &Value) -> Result<String, CacheWardenError> {
        let response = self
            .client
            .post(self.server.endpoint(wire::QUEUE_PATH))
            .timeout(self.timeouts.submit)
            .json(&json!({ "prompt": workflow }))
            .send()
            .await?;
        let response = require_status(response, |status| status == StatusCode::OK).await?;
        let body = response.text().await?;
        wire::parse_job_id(&body).ok_or(CacheWardenError::MissingJobId(body))
    }

    async fn queue(&self) -> Result<QueueSnapshot, CacheWardenError> {
        let response = self.get(self.server.endpoint(wire::QUEUE_PATH)).await?;
        let body: Value = response.json().await?;
        Ok(QueueSnapshot::parse(&body)?)
    }

    async fn history(&self, job_id: &str) -> Result<Option<HistoryRecord>, CacheWardenError> {
        let url = self
            .server
            .endpoint(&format!("{}/{}", wire::HISTORY_PATH, job_id));
        let response = self.get(url).await?;
        let body: Value = response.json().await?;
        Ok(HistoryRecord::from_response(body, job_id))
    }
}
