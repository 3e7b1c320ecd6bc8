// SPDX-License-Identifier: MIT OR Apache-2.0
//! Backend HTTP API.

use crate::callbacks;
use crate::imports;
use crate::input_requests::{self, AnswerInputRequest, CreateInputRequest};
use crate::repo::UsageRow;
use crate::sessions::{self, SessionUpdate};
use crate::state::AppState;
use crate::tasks::{self, TaskEnqueueRequest};
use crate::ws_api;
use axum::http::HeaderValue;
use axum::{
    Json, Router,
    extract::{Path as AxPath, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use swb_core::trace::{REQUEST_ID_HEADER, TRACE_ID_HEADER};
use swb_core::{
    ClaimedRun, McpPreset, RequestContext, ScheduleMode, SessionStatus, SkillPreset, TaskConfig,
};
use swb_error::{Error, ErrorKind, ok};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::info;
use uuid::Uuid;

/// User applied when no identity header is present.
pub const DEFAULT_USER_ID: &str = "default";

/// Resolve the caller's user id from `X-User-Id`.
#[must_use]
pub fn current_user_id(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_USER_ID.to_string())
}

fn require_internal_token(state: &AppState, headers: &HeaderMap) -> Result<(), Error> {
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

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

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

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::any())
        .allow_headers(AllowHeaders::any())
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the Backend router with every route and middleware layer.
pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.cors_origins);
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/sessions", post(create_session).get(list_sessions))
        .route(
            "/api/v1/sessions/{session_id}",
            get(get_session).patch(update_session),
        )
        .route("/api/v1/sessions/{session_id}/state", get(get_session_state))
        .route("/api/v1/sessions/{session_id}/messages", get(get_messages))
        .route(
            "/api/v1/sessions/{session_id}/tool-executions",
            get(get_tool_executions),
        )
        .route("/api/v1/sessions/{session_id}/usage", get(get_usage))
        .route(
            "/api/v1/sessions/{session_id}/workspace/files",
            get(get_workspace_files),
        )
        .route("/api/v1/tasks", post(enqueue_task))
        .route("/api/v1/callback", post(receive_callback))
        .route("/api/v1/runs/claim", post(claim_run))
        .route("/api/v1/runs/cancel", post(cancel_session_run))
        .route("/api/v1/runs/{run_id}/start", post(start_run))
        .route("/api/v1/runs/{run_id}/fail", post(fail_run))
        .route("/api/v1/runs/{run_id}/complete", post(complete_run))
        .route("/api/v1/runs/{run_id}/cancel", post(cancel_run))
        .route(
            "/api/v1/internal/user-input-requests",
            post(create_user_input),
        )
        .route(
            "/api/v1/internal/user-input-requests/{request_id}",
            get(get_user_input),
        )
        .route("/api/v1/user-input-requests", get(list_user_inputs))
        .route(
            "/api/v1/user-input-requests/{request_id}/answer",
            post(answer_user_input),
        )
        .route("/api/v1/internal/env-vars/map", get(get_env_map))
        .route("/api/v1/env-vars", put(put_env_vars))
        .route("/api/v1/mcp-presets", get(list_mcp_presets).post(create_mcp_preset))
        .route(
            "/api/v1/skill-presets",
            get(list_skill_presets).post(create_skill_preset),
        )
        .route("/api/v1/slash-commands", put(put_slash_commands))
        .route("/api/v1/internal/slash-commands", get(get_slash_commands))
        .route(
            "/api/v1/internal/scheduled-tasks/dispatch-due",
            post(dispatch_due),
        )
        .route("/api/v1/schedules", get(get_schedules))
        .route("/api/v1/skill-imports/commit", post(commit_skill_import))
        .route("/api/v1/skill-imports/jobs/{job_id}", get(get_skill_import_job))
        .route("/ws/sessions/{session_id}", get(ws_api::session_websocket))
        .route("/ws/user", get(ws_api::user_websocket))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "time": chrono::Utc::now().to_rfc3339()}))
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SessionCreateBody {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    config: Option<TaskConfig>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    100
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SessionCreateBody>,
) -> Result<Response, Error> {
    let user_id = body.user_id.unwrap_or_else(|| current_user_id(&headers));
    let mut config = body.config.unwrap_or_default();
    config.user_id = user_id.clone();
    let session = sessions::create_session(&state.db, &user_id, config, None);
    Ok(ok(session, "Session created successfully"))
}

async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<Response, Error> {
    let user_id = current_user_id(&headers);
    let sessions = state.db.sessions_for_user(&user_id, page.limit, page.offset);
    Ok(ok(sessions, "Sessions retrieved successfully"))
}

async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxPath(session_id): AxPath<Uuid>,
) -> Result<Response, Error> {
    let session = sessions::get_owned_session(&state.db, session_id, &current_user_id(&headers))?;
    Ok(ok(session, "Session retrieved successfully"))
}

async fn get_session_state(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxPath(session_id): AxPath<Uuid>,
) -> Result<Response, Error> {
    let session = sessions::get_owned_session(&state.db, session_id, &current_user_id(&headers))?;
    Ok(ok(
        sessions::session_state_payload(&session),
        "Session state retrieved successfully",
    ))
}

async fn update_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxPath(session_id): AxPath<Uuid>,
    Json(update): Json<SessionUpdate>,
) -> Result<Response, Error> {
    sessions::get_owned_session(&state.db, session_id, &current_user_id(&headers))?;
    let session = sessions::update_session(&state.db, session_id, update)?;
    Ok(ok(session, "Session updated successfully"))
}

async fn get_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxPath(session_id): AxPath<Uuid>,
) -> Result<Response, Error> {
    sessions::get_owned_session(&state.db, session_id, &current_user_id(&headers))?;
    let messages = state.db.messages_for_session(session_id);
    Ok(ok(messages, "Messages retrieved successfully"))
}

async fn get_tool_executions(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxPath(session_id): AxPath<Uuid>,
) -> Result<Response, Error> {
    sessions::get_owned_session(&state.db, session_id, &current_user_id(&headers))?;
    let executions = state.db.tool_executions_for_session(session_id);
    Ok(ok(executions, "Tool executions retrieved successfully"))
}

fn usage_summary(session_id: Uuid, rows: &[UsageRow]) -> Value {
    let sum = |f: fn(&UsageRow) -> Option<i64>| rows.iter().filter_map(f).sum::<i64>();
    json!({
        "session_id": session_id,
        "total_cost_usd": rows.iter().filter_map(|r| r.total_cost_usd).sum::<f64>(),
        "total_input_tokens": sum(|r| r.input_tokens),
        "total_output_tokens": sum(|r| r.output_tokens),
        "total_duration_ms": sum(|r| r.duration_ms),
        "logs": rows,
    })
}

async fn get_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxPath(session_id): AxPath<Uuid>,
) -> Result<Response, Error> {
    sessions::get_owned_session(&state.db, session_id, &current_user_id(&headers))?;
    let rows = state.db.usage_for_session(session_id);
    Ok(ok(
        usage_summary(session_id, &rows),
        "Usage statistics retrieved successfully",
    ))
}

async fn get_workspace_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxPath(session_id): AxPath<Uuid>,
) -> Result<Response, Error> {
    let session = sessions::get_owned_session(&state.db, session_id, &current_user_id(&headers))?;
    if session.workspace_manifest_key.is_none() {
        return Ok(ok(Value::Array(Vec::new()), "Workspace export not ready"));
    }
    let payload = state
        .fanout
        .workspace_files_payload(
            session.workspace_manifest_key.as_deref(),
            session.workspace_files_prefix.as_deref(),
            session.workspace_export_status,
        )
        .await;
    Ok(ok(payload["files"].clone(), "Workspace files retrieved"))
}

// ---------------------------------------------------------------------------
// Tasks and callbacks
// ---------------------------------------------------------------------------

async fn enqueue_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::Extension(ctx): axum::Extension<RequestContext>,
    Json(request): Json<TaskEnqueueRequest>,
) -> Result<Response, Error> {
    let user_id = current_user_id(&headers);
    let response = tasks::enqueue_task(&state.db, &user_id, &request)?;

    if request.schedule_mode == ScheduleMode::Immediate && request.scheduled_at.is_none() {
        let http = state.http.clone();
        let settings = state.settings.clone();
        let reason = format!("enqueue_run:{}", response.run_id);
        tokio::spawn(async move {
            tasks::trigger_run_pull(
                &http,
                &settings,
                &ctx,
                &[ScheduleMode::Immediate],
                &reason,
            )
            .await;
        });
    }
    Ok(ok(response, "Task enqueued successfully"))
}

async fn receive_callback(
    State(state): State<AppState>,
    Json(callback): Json<swb_core::AgentCallback>,
) -> Result<Response, Error> {
    let outcome = callbacks::process_agent_callback(&state.db, &callback);
    if let Some(session) = &outcome.session {
        state
            .fanout
            .broadcast_callback(session, &callback, outcome.message.as_ref())
            .await;
    }
    Ok(ok(outcome.response, "Callback processed"))
}

// ---------------------------------------------------------------------------
// Run queue
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ClaimBody {
    worker_id: String,
    #[serde(default = "default_lease")]
    lease_seconds: i64,
    #[serde(default)]
    schedule_modes: Option<Vec<ScheduleMode>>,
}

fn default_lease() -> i64 {
    30
}

#[derive(Debug, Deserialize)]
struct WorkerBody {
    worker_id: String,
    #[serde(default)]
    error_message: Option<String>,
}

async fn claim_run(
    State(state): State<AppState>,
    Json(body): Json<ClaimBody>,
) -> Result<Response, Error> {
    let modes = body
        .schedule_modes
        .unwrap_or_else(|| vec![ScheduleMode::Immediate, ScheduleMode::Scheduled]);
    let claimed = state
        .db
        .runs
        .claim(&body.worker_id, body.lease_seconds, &modes)
        .and_then(|run| {
            let session = state.db.session(run.session_id)?;
            Some(ClaimedRun {
                prompt: run.prompt.clone(),
                user_id: session.user_id,
                config_snapshot: session.config_snapshot,
                sdk_session_id: session.sdk_session_id,
                run,
            })
        });
    Ok(ok(claimed, "Claim processed"))
}

async fn start_run(
    State(state): State<AppState>,
    AxPath(run_id): AxPath<Uuid>,
    Json(body): Json<WorkerBody>,
) -> Result<Response, Error> {
    let run = state.db.runs.start(run_id, &body.worker_id)?;
    Ok(ok(run, "Run started"))
}

async fn fail_run(
    State(state): State<AppState>,
    AxPath(run_id): AxPath<Uuid>,
    Json(body): Json<WorkerBody>,
) -> Result<Response, Error> {
    let run = state
        .db
        .runs
        .fail(run_id, &body.worker_id, body.error_message)?;
    let session = state.db.update_session(run.session_id, |session| {
        session.status = SessionStatus::Failed;
    });
    if let Some(session) = session {
        broadcast_run_status(&state, &session, "failed", run.progress).await;
    }
    Ok(ok(run, "Run failed"))
}

async fn complete_run(
    State(state): State<AppState>,
    AxPath(run_id): AxPath<Uuid>,
    Json(body): Json<WorkerBody>,
) -> Result<Response, Error> {
    let run = state.db.runs.complete(run_id, &body.worker_id)?;
    Ok(ok(run, "Run completed"))
}

async fn cancel_run(
    State(state): State<AppState>,
    AxPath(run_id): AxPath<Uuid>,
) -> Result<Response, Error> {
    let run = state.db.runs.cancel(run_id)?;
    let session = state.db.update_session(run.session_id, |session| {
        session.status = SessionStatus::Failed;
    });
    if let Some(session) = session {
        broadcast_run_status(&state, &session, "failed", run.progress).await;
    }
    Ok(ok(run, "Run canceled"))
}

#[derive(Debug, Deserialize)]
struct CancelSessionBody {
    session_id: Uuid,
}

/// Cancel the active run of a session: the run becomes `canceled`, the
/// session `failed`, and the session channel sees a `session.status`.
async fn cancel_session_run(
    State(state): State<AppState>,
    Json(body): Json<CancelSessionBody>,
) -> Result<Response, Error> {
    let run = state.db.runs.cancel_active_for_session(body.session_id);
    // A cancel with no active run leaves the session untouched.
    if let Some(run) = &run {
        let session = state.db.update_session(body.session_id, |session| {
            session.status = SessionStatus::Failed;
        });
        if let Some(session) = &session {
            broadcast_run_status(&state, session, "failed", run.progress).await;
        }
    }
    Ok(ok(
        json!({"session_id": body.session_id, "run": run}),
        "Session run canceled",
    ))
}

async fn broadcast_run_status(
    state: &AppState,
    session: &swb_core::Session,
    status: &str,
    progress: u8,
) {
    let event = crate::ws::WsEvent::new(
        crate::ws::EventType::SessionStatus,
        session.session_id.to_string(),
        json!({"status": status, "progress": progress, "current_step": null}),
    );
    state
        .registry
        .broadcast(&session.session_id.to_string(), &event)
        .await;
}

// ---------------------------------------------------------------------------
// User input requests
// ---------------------------------------------------------------------------

async fn create_user_input(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateInputRequest>,
) -> Result<Response, Error> {
    require_internal_token(&state, &headers)?;
    let request = input_requests::create_request(&state.db, &state.fanout, payload).await?;
    Ok(ok(request, "User input request created"))
}

async fn get_user_input(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxPath(request_id): AxPath<Uuid>,
) -> Result<Response, Error> {
    require_internal_token(&state, &headers)?;
    let request = input_requests::get_request(&state.db, &state.fanout, request_id).await?;
    Ok(ok(request, "User input request retrieved"))
}

#[derive(Debug, Deserialize)]
struct UserInputListQuery {
    #[serde(default)]
    session_id: Option<Uuid>,
}

async fn list_user_inputs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserInputListQuery>,
) -> Result<Response, Error> {
    let user_id = current_user_id(&headers);
    let requests = input_requests::list_pending_for_user(&state.db, &user_id, query.session_id);
    Ok(ok(requests, "Pending user input requests retrieved"))
}

async fn answer_user_input(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxPath(request_id): AxPath<Uuid>,
    Json(payload): Json<AnswerInputRequest>,
) -> Result<Response, Error> {
    let user_id = current_user_id(&headers);
    let request =
        input_requests::answer_request(&state.db, &state.fanout, &user_id, request_id, payload)
            .await?;
    Ok(ok(request, "User input request answered"))
}

// ---------------------------------------------------------------------------
// Env vars, presets, slash commands
// ---------------------------------------------------------------------------

async fn get_env_map(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    require_internal_token(&state, &headers)?;
    let user_id = current_user_id(&headers);
    Ok(ok(state.db.env_vars(&user_id), "Env map retrieved"))
}

async fn put_env_vars(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(vars): Json<BTreeMap<String, String>>,
) -> Result<Response, Error> {
    let user_id = current_user_id(&headers);
    state.db.set_env_vars(&user_id, vars);
    Ok(ok(json!({"user_id": user_id}), "Env vars updated"))
}

#[derive(Debug, Deserialize)]
struct PresetQuery {
    #[serde(default)]
    include_inactive: bool,
}

async fn list_mcp_presets(
    State(state): State<AppState>,
    Query(query): Query<PresetQuery>,
) -> Result<Response, Error> {
    Ok(ok(
        state.db.mcp_presets(query.include_inactive),
        "MCP presets retrieved",
    ))
}

async fn create_mcp_preset(
    State(state): State<AppState>,
    Json(preset): Json<McpPreset>,
) -> Result<Response, Error> {
    state.db.upsert_mcp_preset(preset.clone());
    Ok(ok(preset, "MCP preset saved"))
}

async fn list_skill_presets(
    State(state): State<AppState>,
    Query(query): Query<PresetQuery>,
) -> Result<Response, Error> {
    Ok(ok(
        state.db.skill_presets(query.include_inactive),
        "Skill presets retrieved",
    ))
}

async fn create_skill_preset(
    State(state): State<AppState>,
    Json(preset): Json<SkillPreset>,
) -> Result<Response, Error> {
    state.db.upsert_skill_preset(preset.clone());
    Ok(ok(preset, "Skill preset saved"))
}

async fn put_slash_commands(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(commands): Json<BTreeMap<String, String>>,
) -> Result<Response, Error> {
    let user_id = current_user_id(&headers);
    state.db.set_slash_commands(&user_id, commands);
    Ok(ok(json!({"user_id": user_id}), "Slash commands updated"))
}

async fn get_slash_commands(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    require_internal_token(&state, &headers)?;
    let user_id = current_user_id(&headers);
    Ok(ok(state.db.slash_commands(&user_id), "Slash commands retrieved"))
}

// ---------------------------------------------------------------------------
// Scheduled tasks, schedules proxy, skill imports
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DispatchDueBody {
    #[serde(default = "default_dispatch_limit")]
    limit: usize,
}

fn default_dispatch_limit() -> usize {
    50
}

async fn dispatch_due(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DispatchDueBody>,
) -> Result<Response, Error> {
    require_internal_token(&state, &headers)?;
    let dispatched = tasks::count_due_scheduled(&state.db, body.limit);
    Ok(ok(json!({"dispatched": dispatched}), "Due scheduled tasks counted"))
}

async fn get_schedules(
    State(state): State<AppState>,
    axum::Extension(ctx): axum::Extension<RequestContext>,
) -> Result<Response, Error> {
    let base = state.settings.executor_manager_url.trim_end_matches('/');
    let url = format!("{base}/api/v1/schedules");
    let response = state
        .http
        .get(&url)
        .timeout(Duration::from_secs(3))
        .header(REQUEST_ID_HEADER, &ctx.request_id)
        .header(TRACE_ID_HEADER, &ctx.trace_id)
        .send()
        .await
        .map_err(|e| {
            Error::new(
                ErrorKind::ExternalServiceError,
                format!("Executor Manager unavailable: {e}"),
            )
        })?;
    if !response.status().is_success() {
        return Err(Error::new(
            ErrorKind::ExternalServiceError,
            format!(
                "Executor Manager schedules request failed: {}",
                response.status()
            ),
        ));
    }
    let payload: Value = response.json().await.map_err(|e| {
        Error::new(ErrorKind::ExternalServiceError, format!("Invalid schedules payload: {e}"))
    })?;
    let data = payload.get("data").cloned().unwrap_or(payload);
    Ok(ok(data, "Schedules retrieved"))
}

#[derive(Debug, Deserialize)]
struct SkillImportCommitBody {
    archive_key: String,
    #[serde(default)]
    selections: Vec<Value>,
}

async fn commit_skill_import(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SkillImportCommitBody>,
) -> Result<Response, Error> {
    let user_id = current_user_id(&headers);
    let job = imports::enqueue_commit(&state.db, &user_id, body.archive_key, body.selections);
    state.import_wakeup.notify_one();
    Ok(ok(
        json!({"job_id": job.id, "status": job.status}),
        "Skill import enqueued",
    ))
}

async fn get_skill_import_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxPath(job_id): AxPath<Uuid>,
) -> Result<Response, Error> {
    let user_id = current_user_id(&headers);
    let job = imports::get_job(&state.db, &user_id, job_id)?;
    Ok(ok(job, "Skill import job retrieved"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use swb_queue::QueueError;

    #[test]
    fn default_user_when_header_missing() {
        let headers = HeaderMap::new();
        assert_eq!(current_user_id(&headers), DEFAULT_USER_ID);
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("u7"));
        assert_eq!(current_user_id(&headers), "u7");
    }

    #[test]
    fn queue_errors_map_to_kinds() {
        let id = Uuid::new_v4();
        let err: Error = QueueError::LeaseLost {
            run_id: id,
            worker_id: "w".into(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::LeaseLost);
        assert_eq!(err.kind.http_status(), StatusCode::CONFLICT);

        let err: Error = QueueError::NotFound(id).into();
        assert_eq!(err.kind, ErrorKind::TaskNotFound);
    }
}
