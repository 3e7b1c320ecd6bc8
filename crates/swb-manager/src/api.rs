// SPDX-License-Identifier: MIT OR Apache-2.0
//! Executor Manager HTTP API.

use crate::state::ManagerState;
use crate::workspace_local;
use axum::http::HeaderValue;
use axum::{
    Json, Router,
    extract::{Path as AxPath, Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use swb_core::trace::{REQUEST_ID_HEADER, TRACE_ID_HEADER};
use swb_core::{AgentCallback, RequestContext, ScheduleMode};
use swb_error::{Error, ErrorKind, ok};
use tracing::info;

fn require_internal_token(state: &ManagerState, headers: &HeaderMap) -> Result<(), Error> {
    if state.settings.internal_api_token.is_empty() {
        return Err(Error::forbidden("Internal API token is not configured"));
    }
    let presented = headers
        .get("x-internal-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if presented != state.settings.internal_api_token {
        return Err(Error::forbidden("Invalid internal token"));
    }
    Ok(())
}

/// Capture or generate request/trace ids and echo them on the response.
pub async fn request_context_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let trace_id = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ctx = RequestContext::from_headers(request_id.as_deref(), trace_id.as_deref());
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// One structured line per request.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    if path == "/health" {
        return next.run(request).await;
    }
    let start = Instant::now();
    let response = next.run(request).await;
    info!(
        http.method = %method,
        http.path = %path,
        http.status = response.status().as_u16(),
        http.duration_ms = start.elapsed().as_millis() as u64,
        "http_request"
    );
    response
}

/// Build the Manager router.
pub fn build_app(state: ManagerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/callback", post(receive_callback))
        .route("/api/v1/executor/cancel", post(cancel_task))
        .route("/api/v1/executor/delete", post(delete_container))
        .route("/api/v1/executor/load", get(executor_load))
        .route("/api/v1/internal/pull/trigger", post(trigger_pull))
        .route("/api/v1/schedules", get(get_schedules))
        .route("/api/v1/user-input-requests", post(create_user_input))
        .route("/api/v1/user-input-requests/{request_id}", get(get_user_input))
        .route("/api/v1/workspace/stats", get(workspace_stats))
        .route("/api/v1/workspace/users/{user_id}", get(user_workspaces))
        .route(
            "/api/v1/workspace/archive/{user_id}/{session_id}",
            post(archive_workspace),
        )
        .route(
            "/api/v1/workspace/{user_id}/{session_id}",
            delete(delete_workspace),
        )
        .route(
            "/api/v1/workspace/files/{user_id}/{session_id}",
            get(list_workspace_files),
        )
        .route(
            "/api/v1/workspace/file/{user_id}/{session_id}",
            get(get_workspace_file),
        )
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(middleware::from_fn(request_context_middleware))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "time": chrono::Utc::now().to_rfc3339()}))
}

// ---------------------------------------------------------------------------
// Callback ingress
// ---------------------------------------------------------------------------

async fn receive_callback(
    State(state): State<ManagerState>,
    headers: HeaderMap,
    axum::Extension(ctx): axum::Extension<RequestContext>,
    Json(callback): Json<AgentCallback>,
) -> Result<Response, Error> {
    if !state.settings.callback_token.is_empty() {
        let presented = headers
            .get("x-callback-token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != state.settings.callback_token {
            return Err(Error::forbidden("Invalid callback token"));
        }
    }
    let receipt = state.pipeline.process_callback(callback, ctx).await?;
    Ok(ok(receipt, "Callback received"))
}

// ---------------------------------------------------------------------------
// Executor control
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CancelBody {
    session_id: String,
}

async fn cancel_task(
    State(state): State<ManagerState>,
    axum::Extension(ctx): axum::Extension<RequestContext>,
    Json(body): Json<CancelBody>,
) -> Result<Response, Error> {
    state.pool.cancel_task(&body.session_id).await?;
    // Transition the run/session on the Backend as well; a cancel with
    // no active run is still a successful container release.
    if let Err(error) = state.backend.cancel_session_run(&ctx, &body.session_id).await {
        tracing::warn!(session_id = %body.session_id, %error, "backend cancel failed");
    }
    Ok(ok(
        json!({"session_id": body.session_id, "status": "canceled"}),
        "Task canceled successfully",
    ))
}

#[derive(Debug, Deserialize)]
struct DeleteBody {
    container_id: String,
}

async fn delete_container(
    State(state): State<ManagerState>,
    Json(body): Json<DeleteBody>,
) -> Result<Response, Error> {
    state.pool.delete_container(&body.container_id).await?;
    Ok(ok(
        json!({"container_id": body.container_id, "status": "deleted"}),
        "Container deleted successfully",
    ))
}

async fn executor_load(State(state): State<ManagerState>) -> Result<Response, Error> {
    Ok(ok(state.pool.stats().await, "Executor load retrieved"))
}

// ---------------------------------------------------------------------------
// Pull trigger + schedules
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PullTriggerBody {
    #[serde(default)]
    schedule_modes: Option<Vec<ScheduleMode>>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct PullTriggerResponse {
    accepted: bool,
    schedule_modes: Vec<ScheduleMode>,
    reason: Option<String>,
}

async fn trigger_pull(
    State(state): State<ManagerState>,
    headers: HeaderMap,
    Json(body): Json<PullTriggerBody>,
) -> Result<Response, Error> {
    require_internal_token(&state, &headers)?;

    if !state.settings.task_pull_enabled {
        return Ok(ok(
            PullTriggerResponse {
                accepted: false,
                schedule_modes: body.schedule_modes.unwrap_or_default(),
                reason: Some("task_pull_disabled".to_string()),
            },
            "Run pull service is disabled",
        ));
    }

    let requested = body
        .schedule_modes
        .unwrap_or_else(|| vec![ScheduleMode::Immediate]);
    let active = state.pull.get_active_schedule_modes();
    let effective: Vec<ScheduleMode> = requested
        .iter()
        .copied()
        .filter(|mode| active.contains(mode))
        .collect();

    if effective.is_empty() {
        return Ok(ok(
            PullTriggerResponse {
                accepted: false,
                schedule_modes: requested,
                reason: Some("no_active_modes".to_string()),
            },
            "No active schedule modes to poll",
        ));
    }

    let accepted = state.pull.trigger_poll(&effective, body.reason.as_deref());
    let message = if accepted { "Pull triggered" } else { "Pull skipped" };
    Ok(ok(
        PullTriggerResponse {
            accepted,
            schedule_modes: effective,
            reason: body.reason,
        },
        message,
    ))
}

async fn get_schedules(State(state): State<ManagerState>) -> Result<Response, Error> {
    Ok(ok(state.pull.schedule_config(), "Schedules retrieved"))
}

// ---------------------------------------------------------------------------
// User-input proxy (executor-facing)
// ---------------------------------------------------------------------------

async fn create_user_input(
    State(state): State<ManagerState>,
    axum::Extension(ctx): axum::Extension<RequestContext>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Response, Error> {
    let request = state.backend.create_user_input_request(&ctx, &payload).await?;
    Ok(ok(request, "User input request created"))
}

async fn get_user_input(
    State(state): State<ManagerState>,
    axum::Extension(ctx): axum::Extension<RequestContext>,
    AxPath(request_id): AxPath<String>,
) -> Result<Response, Error> {
    let request = state.backend.get_user_input_request(&ctx, &request_id).await?;
    Ok(ok(request, "User input request retrieved"))
}

// ---------------------------------------------------------------------------
// Workspace administration
// ---------------------------------------------------------------------------

async fn workspace_stats(State(state): State<ManagerState>) -> Result<Response, Error> {
    let stats = workspace_local::disk_usage(&state.layout, &state.settings.ignore_policy);
    Ok(ok(stats, "Workspace stats retrieved"))
}

async fn user_workspaces(
    State(state): State<ManagerState>,
    AxPath(user_id): AxPath<String>,
) -> Result<Response, Error> {
    Ok(ok(
        workspace_local::user_workspaces(&state.layout, &user_id),
        "User workspaces retrieved",
    ))
}

async fn archive_workspace(
    State(state): State<ManagerState>,
    AxPath((user_id, session_id)): AxPath<(String, String)>,
) -> Result<Response, Error> {
    let archive = workspace_local::archive_workspace(&state.layout, &user_id, &session_id)?;
    Ok(ok(
        json!({"archive_path": archive.to_string_lossy()}),
        "Workspace archived successfully",
    ))
}

#[derive(Debug, Deserialize)]
struct DeleteWorkspaceQuery {
    #[serde(default)]
    force: bool,
}

async fn delete_workspace(
    State(state): State<ManagerState>,
    AxPath((user_id, session_id)): AxPath<(String, String)>,
    Query(query): Query<DeleteWorkspaceQuery>,
) -> Result<Response, Error> {
    workspace_local::delete_workspace(&state.layout, &user_id, &session_id, query.force)?;
    Ok(ok(
        json!({"user_id": user_id, "session_id": session_id}),
        "Workspace deleted successfully",
    ))
}

async fn list_workspace_files(
    State(state): State<ManagerState>,
    AxPath((user_id, session_id)): AxPath<(String, String)>,
) -> Result<Response, Error> {
    let nodes = workspace_local::list_workspace_files(
        &state.layout,
        &state.settings.ignore_policy,
        &user_id,
        &session_id,
    )?;
    Ok(ok(nodes, "Workspace files retrieved"))
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    path: String,
}

async fn get_workspace_file(
    State(state): State<ManagerState>,
    AxPath((user_id, session_id)): AxPath<(String, String)>,
    Query(query): Query<FileQuery>,
) -> Result<Response, Error> {
    let Some(file_path) =
        workspace_local::resolve_workspace_file(&state.layout, &user_id, &session_id, &query.path)
    else {
        return Err(Error::new(ErrorKind::WorkspaceNotFound, "Workspace file not found"));
    };

    let body = tokio::fs::read(&file_path)
        .await
        .map_err(|e| Error::external(format!("read workspace file: {e}")))?;
    let mime = mime_guess::from_path(&file_path)
        .first_raw()
        .unwrap_or("application/octet-stream");
    let filename = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response())
}
