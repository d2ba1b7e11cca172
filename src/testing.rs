//! Scripted in-memory `Session` for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CacheWardenError;
use crate::server::Server;
use crate::session::Session;
use crate::wire::{HistoryRecord, QueueSnapshot};

pub enum SubmitScript {
    Accept(String),
    Reject(u16, String),
    NoJobId,
    Panic,
}

/// Answers each call from a script. The last queue/history entry repeats forever.
pub struct ScriptedSession {
    server: Server,
    readiness: Result<String, u16>,
    submit: SubmitScript,
    submit_delay: Duration,
    history_delay: Duration,
    queue: Mutex<VecDeque<Result<QueueSnapshot, u16>>>,
    history: Mutex<VecDeque<Option<HistoryRecord>>>,
    pub determine_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
    pub queue_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    active_submits: AtomicUsize,
    pub max_active_submits: AtomicUsize,
}

impl ScriptedSession {
    pub fn new(url: &str) -> Self {
        Self {
            server: Server::new(url).unwrap(),
            readiness: Ok(String::new()),
            submit: SubmitScript::Accept("job-1".into()),
            submit_delay: Duration::ZERO,
            history_delay: Duration::ZERO,
            queue: Mutex::new(VecDeque::from([Ok(QueueSnapshot::default())])),
            history: Mutex::new(VecDeque::from([None])),
            determine_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
            queue_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
            active_submits: AtomicUsize::new(0),
            max_active_submits: AtomicUsize::new(0),
        }
    }

    pub fn ready(mut self) -> Self {
        self.readiness = Ok("<p>缓存已加载</p>".into());
        self
    }

    pub fn readiness_status(mut self, status: u16) -> Self {
        self.readiness = Err(status);
        self
    }

    pub fn submit_with(mut self, script: SubmitScript) -> Self {
        self.submit = script;
        self
    }

    pub fn submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn history_delay(mut self, delay: Duration) -> Self {
        self.history_delay = delay;
        self
    }

    pub fn queue_script(self, script: Vec<Result<QueueSnapshot, u16>>) -> Self {
        *self.queue.lock().unwrap() = script.into();
        self
    }

    pub fn history_script(self, script: Vec<Option<Value>>) -> Self {
        *self.history.lock().unwrap() = script
            .into_iter()
            .map(|entry| {
                entry.and_then(|record| {
                    HistoryRecord::from_response(serde_json::json!({ "job-1": record }), "job-1")
                })
            })
            .collect();
        self
    }

    fn next<T: Clone>(script: &Mutex<VecDeque<T>>) -> T {
        let mut script = script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap()
        }
    }
}

pub fn pending(ids: &[&str]) -> QueueSnapshot {
    QueueSnapshot {
        running: vec![],
        pending: ids.iter().map(|id| id.to_string()).collect(),
    }
}

pub fn running(ids: &[&str]) -> QueueSnapshot {
    QueueSnapshot {
        running: ids.iter().map(|id| id.to_string()).collect(),
        pending: vec![],
    }
}

fn bad_status(status: u16) -> CacheWardenError {
    CacheWardenError::BadStatus {
        status,
        body: "scripted".into(),
    }
}

#[async_trait]
impl Session for ScriptedSession {
    fn server(&self) -> &Server {
        &self.server
    }

    async fn determine(&self) -> Result<String, CacheWardenError> {
        self.determine_calls.fetch_add(1, Ordering::SeqCst);
        self.readiness.clone().map_err(bad_status)
    }

    async fn submit(&self, _workflow: &Value) -> Result<String, CacheWardenError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active_submits.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_submits.fetch_max(active, Ordering::SeqCst);
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        self.active_submits.fetch_sub(1, Ordering::SeqCst);
        match &self.submit {
            SubmitScript::Accept(id) => Ok(id.clone()),
            SubmitScript::Reject(status, body) => Err(CacheWardenError::BadStatus {
                status: *status,
                body: body.clone(),
            }),
            SubmitScript::NoJobId => Err(CacheWardenError::MissingJobId("{}".into())),
            SubmitScript::Panic => panic!("scripted submit panic"),
        }
    }

    async fn queue(&self) -> Result<QueueSnapshot, CacheWardenError> {
        self.queue_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.queue).map_err(bad_status)
    }

    async fn history(&self, _job_id: &str) -> Result<Option<HistoryRecord>, CacheWardenError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if !self.history_delay.is_zero() {
            tokio::time::sleep(self.history_delay).await;
        }
        Ok(Self::next(&self.history))
    }
}
