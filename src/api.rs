//! HTTP API.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Service banner |
//! | GET | `/status` | Live cache readiness of every server |
//! | GET | `/dashboard` | HTML status page |
//! | POST | `/check/all` | Start a fleet pass in the background |
//! | POST | `/check/all/sync` | Run a fleet pass and return its report |
//! | POST | `/check/{index}` | Start reconciling one server in the background |
//! | POST | `/check/{index}/sync` | Reconcile one server and return the result |
//!
//! Background triggers answer `202 Accepted` right away; what happens afterwards only
//! shows up in the logs and the status views.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::dashboard::Dashboard;
use crate::error::TriggerError;
use crate::scheduler::FleetScheduler;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<FleetScheduler>,
    pub dashboard: Arc<Dashboard>,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/status", get(status))
        .route("/dashboard", get(dashboard))
        .route("/check/all", post(check_all))
        .route("/check/all/sync", post(check_all_sync))
        .route("/check/{index}", post(check_server))
        .route("/check/{index}/sync", post(check_server_sync))
        .with_state(state)
}

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn ok<T: Serialize>(status: StatusCode, data: Option<T>, message: Option<String>) -> Response {
    (
        status,
        Json(ApiResponse {
            success: true,
            data,
            message,
            error: None,
        }),
    )
        .into_response()
}

fn accepted(message: String) -> Response {
    ok::<()>(StatusCode::ACCEPTED, None, Some(message))
}

fn error_response(msg: String, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            message: None,
            error: Some(msg),
        }),
    )
        .into_response()
}

fn trigger_error(e: TriggerError) -> Response {
    let status = match e {
        TriggerError::Busy | TriggerError::InFlight(_) => StatusCode::CONFLICT,
        TriggerError::NoSuchServer(_) => StatusCode::NOT_FOUND,
        TriggerError::NoServers => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(e.to_string(), status)
}

/// GET /
async fn root(State(state): State<ApiState>) -> Response {
    ok(
        StatusCode::OK,
        Some(serde_json::json!({ "servers": state.scheduler.server_count() })),
        Some("ComfyUI cache checker".to_string()),
    )
}

/// GET /status
async fn status(State(state): State<ApiState>) -> Response {
    let statuses = state.scheduler.statuses().await;
    ok(StatusCode::OK, Some(statuses), None)
}

/// GET /dashboard
async fn dashboard(State(state): State<ApiState>) -> Response {
    let statuses = state.scheduler.statuses().await;
    match state.dashboard.render(&statuses, state.scheduler.is_busy()) {
        Ok(html) => Html(html).into_response(),
        Err(e) => error_response(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// POST /check/all
async fn check_all(State(state): State<ApiState>) -> Response {
    match state.scheduler.trigger_pass() {
        Ok(()) => accepted("Started checking all servers".to_string()),
        Err(e) => trigger_error(e),
    }
}

/// POST /check/all/sync
async fn check_all_sync(State(state): State<ApiState>) -> Response {
    match state.scheduler.run_pass().await {
        Ok(report) => ok(StatusCode::OK, Some(report), None),
        Err(e) => trigger_error(e),
    }
}

/// POST /check/{index}
async fn check_server(State(state): State<ApiState>, Path(index): Path<usize>) -> Response {
    match state.scheduler.trigger_one(index) {
        Ok(()) => {
            let label = state
                .scheduler
                .servers()
                .nth(index)
                .map(|server| server.label().to_string())
                .unwrap_or_default();
            accepted(format!("Started checking server {}", label))
        }
        Err(e) => trigger_error(e),
    }
}

/// POST /check/{index}/sync
async fn check_server_sync(State(state): State<ApiState>, Path(index): Path<usize>) -> Response {
    match state.scheduler.reconcile_one(index).await {
        Ok(result) => ok(StatusCode::OK, Some(result), None),
        Err(e) => trigger_error(e),
    }
}
