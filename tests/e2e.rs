//! End-to-end tests against in-process mock ComfyUI servers.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use cachewarden::api::{build_router, ApiState};
use cachewarden::dashboard::Dashboard;
use cachewarden::{
    get_servers, FleetScheduler, HttpSession, JobOutcome, Readiness, Reconciler, Server, Timeouts,
    WaitPolicy, Workflow,
};

/// Scripted behavior of one mock ComfyUI server.
#[derive(Debug, Clone)]
struct MockBehavior {
    cache_loaded: bool,
    determine_delay: Duration,
    submit_status: StatusCode,
    submit_body: Option<Value>,
    /// Queue polls during which a submitted job is still listed as pending.
    pending_polls: usize,
    /// History record of the job once it has left the queue.
    history: Value,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            cache_loaded: false,
            determine_delay: Duration::ZERO,
            submit_status: StatusCode::OK,
            submit_body: None,
            pending_polls: 2,
            history: json!({"status": {"status_str": "success", "completed": true, "messages": []}, "outputs": {}}),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    behavior: MockBehavior,
    submissions: Vec<Value>,
    job_id: Option<String>,
    queue_polls: usize,
}

type Shared = Arc<Mutex<MockState>>;

async fn determine(State(state): State<Shared>) -> (StatusCode, String) {
    let behavior = state.lock().await.behavior.clone();
    tokio::time::sleep(behavior.determine_delay).await;
    let body = if behavior.cache_loaded {
        "<p>缓存已加载</p>"
    } else {
        "<p>缓存未加载</p>"
    };
    (StatusCode::OK, body.to_string())
}

async fn submit(State(state): State<Shared>, Json(payload): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().await;
    state.submissions.push(payload);
    let id = format!("job-{}", state.submissions.len());
    state.job_id = Some(id.clone());
    let body = state
        .behavior
        .submit_body
        .clone()
        .unwrap_or_else(|| json!({"prompt_id": id, "number": 1, "node_errors": {}}));
    (state.behavior.submit_status, Json(body))
}

async fn queue(State(state): State<Shared>) -> Json<Value> {
    let mut state = state.lock().await;
    state.queue_polls += 1;
    let pending: Vec<Value> = match &state.job_id {
        Some(id) if state.queue_polls <= state.behavior.pending_polls => {
            vec![json!([1, id, {}, {}, []])]
        }
        _ => vec![],
    };
    Json(json!({"queue_running": [], "queue_pending": pending}))
}

async fn history(State(state): State<Shared>, Path(job_id): Path<String>) -> Json<Value> {
    let state = state.lock().await;
    if state.job_id.as_deref() == Some(job_id.as_str()) {
        Json(json!({ job_id: state.behavior.history }))
    } else {
        Json(json!({}))
    }
}

async fn spawn_mock_comfy(behavior: MockBehavior) -> (Server, Shared) {
    let state: Shared = Arc::new(Mutex::new(MockState {
        behavior,
        ..MockState::default()
    }));
    let app = Router::new()
        .route("/inspire/cache/determine", get(determine))
        .route("/api/queue", get(queue).post(submit))
        .route("/api/history/{job_id}", get(history))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (Server::new(&format!("http://{}", addr)).unwrap(), state)
}

fn quick_timeouts() -> Timeouts {
    Timeouts {
        probe: Duration::from_millis(500),
        submit: Duration::from_secs(2),
    }
}

fn quick_wait() -> WaitPolicy {
    WaitPolicy {
        deadline: Duration::from_secs(2),
        poll_interval: Duration::from_millis(50),
        vanish_grace: 3,
    }
}

fn fleet(servers: Vec<Server>) -> Arc<FleetScheduler> {
    let sessions = HttpSession::for_fleet(servers, quick_timeouts()).unwrap();
    let reconciler = Reconciler::new(
        Workflow::from_value(json!({"1": {"class_type": "CacheBackendData", "inputs": {}}})),
        "缓存已加载",
        quick_wait(),
    );
    Arc::new(FleetScheduler::new(sessions, reconciler))
}

// =============================================================================
// Single-server reconciliation over HTTP
// =============================================================================

#[tokio::test]
async fn test_e2e_ready_server_is_left_alone() {
    let (server, state) = spawn_mock_comfy(MockBehavior {
        cache_loaded: true,
        ..MockBehavior::default()
    })
    .await;
    let fleet = fleet(vec![server]);

    let result = fleet.reconcile_one(0).await.unwrap();
    assert_eq!(result.readiness, Readiness::Ready);
    assert!(result.job.is_none());
    assert!(state.lock().await.submissions.is_empty());
}

#[tokio::test]
async fn test_e2e_missing_cache_runs_workflow_to_success() {
    let (server, state) = spawn_mock_comfy(MockBehavior::default()).await;
    let fleet = fleet(vec![server]);

    let result = fleet.reconcile_one(0).await.unwrap();
    assert_eq!(result.readiness, Readiness::NotReady);
    let job = result.job.unwrap();
    assert_eq!(job.outcome, JobOutcome::Success);
    assert_eq!(job.job_id.as_deref(), Some("job-1"));

    let state = state.lock().await;
    assert_eq!(state.submissions.len(), 1);
    // The workflow travels under the "prompt" key.
    assert_eq!(
        state.submissions[0]["prompt"]["1"]["class_type"],
        "CacheBackendData"
    );
    assert!(state.queue_polls >= 3);
}

#[tokio::test]
async fn test_e2e_rejected_submission() {
    let (server, state) = spawn_mock_comfy(MockBehavior {
        submit_status: StatusCode::INTERNAL_SERVER_ERROR,
        submit_body: Some(json!({"error": "boom"})),
        ..MockBehavior::default()
    })
    .await;
    let fleet = fleet(vec![server]);

    let job = fleet.reconcile_one(0).await.unwrap().job.unwrap();
    match job.outcome {
        JobOutcome::SubmissionError(reason) => {
            assert!(reason.contains("500"), "{}", reason);
            assert!(reason.contains("boom"), "{}", reason);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    // No waiting after a failed submission.
    assert_eq!(state.lock().await.queue_polls, 0);
}

#[tokio::test]
async fn test_e2e_ok_without_job_id_is_submission_error() {
    let (server, state) = spawn_mock_comfy(MockBehavior {
        submit_body: Some(json!({"number": 3})),
        ..MockBehavior::default()
    })
    .await;
    let fleet = fleet(vec![server]);

    let job = fleet.reconcile_one(0).await.unwrap().job.unwrap();
    assert!(matches!(job.outcome, JobOutcome::SubmissionError(_)));
    assert_eq!(state.lock().await.queue_polls, 0);
}

#[tokio::test]
async fn test_e2e_failed_job_reason() {
    let (server, _) = spawn_mock_comfy(MockBehavior {
        history: json!({
            "status": {
                "status_str": "error",
                "completed": false,
                "messages": [["execution_error", {"node_id": "7", "exception_message": "OOM", "traceback": []}]],
            },
            "outputs": {},
        }),
        ..MockBehavior::default()
    })
    .await;
    let fleet = fleet(vec![server]);

    let job = fleet.reconcile_one(0).await.unwrap().job.unwrap();
    assert_eq!(job.outcome, JobOutcome::Failed("节点 7: OOM".to_string()));
}

#[tokio::test]
async fn test_e2e_job_pending_past_deadline_times_out() {
    let (server, state) = spawn_mock_comfy(MockBehavior {
        pending_polls: usize::MAX,
        ..MockBehavior::default()
    })
    .await;
    let fleet = fleet(vec![server]);

    let started = Instant::now();
    let job = fleet.reconcile_one(0).await.unwrap().job.unwrap();
    assert_eq!(job.outcome, JobOutcome::TimedOut);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(5));
    // Only observed; the single submission was never repeated.
    assert_eq!(state.lock().await.submissions.len(), 1);
}

#[tokio::test]
async fn test_e2e_slow_probe_reads_as_not_ready() {
    let (server, _) = spawn_mock_comfy(MockBehavior {
        cache_loaded: true,
        determine_delay: Duration::from_secs(3),
        ..MockBehavior::default()
    })
    .await;
    let fleet = fleet(vec![server]);

    let started = Instant::now();
    let statuses = fleet.statuses().await;
    assert!(!statuses[0].cache_loaded);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_e2e_unreachable_server_is_not_ready() {
    // Bind and drop to get a port nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let server = Server::new(&format!("http://127.0.0.1:{}", port)).unwrap();
    let fleet = fleet(vec![server]);
    let result = fleet.reconcile_one(0).await.unwrap();
    assert_eq!(result.readiness, Readiness::NotReady);
    assert!(matches!(
        result.job.unwrap().outcome,
        JobOutcome::SubmissionError(_)
    ));
}

// =============================================================================
// Fleet passes
// =============================================================================

#[tokio::test]
async fn test_e2e_fleet_pass_runs_servers_concurrently() {
    let mut servers = vec![];
    let mut states = vec![];
    for _ in 0..4 {
        let (server, state) = spawn_mock_comfy(MockBehavior {
            pending_polls: usize::MAX,
            ..MockBehavior::default()
        })
        .await;
        servers.push(server);
        states.push(state);
    }
    let (ready, ready_state) = spawn_mock_comfy(MockBehavior {
        cache_loaded: true,
        ..MockBehavior::default()
    })
    .await;
    servers.push(ready);
    let fleet = fleet(servers);

    let started = Instant::now();
    let report = fleet.run_pass().await.unwrap();
    // Four 2s deadlines side by side, not back to back.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.results.len(), 5);
    assert_eq!(report.ready_count(), 1);
    assert!(report.has_failures());
    for state in states {
        assert_eq!(state.lock().await.submissions.len(), 1);
    }
    assert!(ready_state.lock().await.submissions.is_empty());
}

#[tokio::test]
async fn test_e2e_second_pass_leaves_running_job_alone() {
    let (server, state) = spawn_mock_comfy(MockBehavior {
        pending_polls: usize::MAX,
        ..MockBehavior::default()
    })
    .await;
    let fleet = fleet(vec![server]);

    let first = fleet.run_pass().await.unwrap();
    assert_eq!(
        first.results[0].job.as_ref().unwrap().outcome,
        JobOutcome::TimedOut
    );
    let second = fleet.run_pass().await.unwrap();
    let job = second.results[0].job.as_ref().unwrap();
    assert_eq!(job.outcome, JobOutcome::StillRunning);
    assert_eq!(job.job_id.as_deref(), Some("job-1"));
    assert_eq!(state.lock().await.submissions.len(), 1);
}

#[tokio::test]
async fn test_e2e_servers_file_drives_fleet() {
    let (a, _) = spawn_mock_comfy(MockBehavior {
        cache_loaded: true,
        ..MockBehavior::default()
    })
    .await;
    let (b, _) = spawn_mock_comfy(MockBehavior::default()).await;

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "- {}", a.url).unwrap();
    writeln!(file, "- url: {}\n  name: second", b.url).unwrap();
    let servers = get_servers(file.path(), &[]).unwrap();
    assert_eq!(servers[1].label(), "second");

    let report = fleet(servers).run_pass().await.unwrap();
    assert!(report.results[0].job.is_none());
    assert_eq!(
        report.results[1].job.as_ref().unwrap().outcome,
        JobOutcome::Success
    );
    assert!(!report.has_failures());
}

// =============================================================================
// HTTP surface
// =============================================================================

#[tokio::test]
async fn test_e2e_api_manual_triggers() {
    let (server, state) = spawn_mock_comfy(MockBehavior {
        pending_polls: usize::MAX,
        ..MockBehavior::default()
    })
    .await;
    let scheduler = fleet(vec![server]);
    let app = build_router(ApiState {
        scheduler: Arc::clone(&scheduler),
        dashboard: Arc::new(Dashboard::new().unwrap()),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let client = reqwest::Client::new();

    let first = client
        .post(format!("http://{}/check/0", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = client
        .post(format!("http://{}/check/0", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let status: Value = client
        .get(format!("http://{}/status", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["data"][0]["cache_loaded"], false);
    assert_eq!(status["data"][0]["in_flight"], true);

    // The background reconcile finishes on its own once the deadline passes.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(scheduler.in_flight().is_empty());
    assert_eq!(state.lock().await.submissions.len(), 1);
}
