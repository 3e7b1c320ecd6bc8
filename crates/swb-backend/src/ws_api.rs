// SPDX-License-Identifier: MIT OR Apache-2.0
//! WebSocket endpoints: `/ws/sessions/{session_id}` and `/ws/user`.

use crate::sessions;
use crate::state::AppState;
use crate::ws::{EventType, WsEvent, user_channel};
use axum::{
    extract::{
        Path as AxPath, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    http::HeaderMap,
    response::Response,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use swb_core::WorkspaceExportStatus;
use tracing::warn;
use uuid::Uuid;

/// Close code for policy violations (ownership/identity mismatch).
const POLICY_VIOLATION: u16 = 1008;

fn extract_ws_user_id(
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<String, &'static str> {
    // Browsers cannot set arbitrary headers, so a query param is allowed
    // as a fallback; when both are present they must agree.
    let header_user = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    let query_user = params.get("user_id").map(String::as_str).map(str::trim).unwrap_or("");

    if !header_user.is_empty() && !query_user.is_empty() && header_user != query_user {
        return Err("user_id_mismatch");
    }
    let user_id = if !header_user.is_empty() {
        header_user
    } else if !query_user.is_empty() {
        query_user
    } else {
        crate::api::DEFAULT_USER_ID
    };
    Ok(user_id.to_string())
}

async fn close_forbidden(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: POLICY_VIOLATION,
            reason: "forbidden".into(),
        })))
        .await;
}

/// Session channel endpoint.
pub async fn session_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    AxPath(session_id): AxPath<String>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let user = extract_ws_user_id(&headers, &params);
    ws.on_upgrade(move |socket| session_socket(socket, state, session_id, user))
}

async fn session_socket(
    socket: WebSocket,
    state: AppState,
    session_id: String,
    user: Result<String, &'static str>,
) {
    let user_id = match user {
        Ok(user_id) => user_id,
        Err(reason) => {
            warn!(session_id, reason, "websocket rejected");
            close_forbidden(socket).await;
            return;
        }
    };

    // Resolve to the canonical uuid key; reject foreign sessions before
    // any event is delivered.
    let mut ws_key = session_id.clone();
    let mut session_uuid: Option<Uuid> = None;
    if let Some(session) = sessions::find_by_sdk_id_or_uuid(&state.db, &session_id) {
        if session.user_id != user_id {
            warn!(
                session_id,
                user_id,
                owner_user_id = %session.user_id,
                "websocket rejected: session not owned by user"
            );
            close_forbidden(socket).await;
            return;
        }
        ws_key = session.session_id.to_string();
        session_uuid = Some(session.session_id);
    }

    let (connection_id, mut outbox) = state.registry.connect(&ws_key).await;
    let mut socket = socket;

    // On-connect payloads: snapshot, pending user inputs, and the file
    // tree when the export is already ready.
    let snapshot = state.fanout.session_snapshot_event(&session_id);
    if socket.send(Message::Text(snapshot.to_json().into())).await.is_err() {
        state.registry.disconnect(&ws_key, connection_id).await;
        return;
    }
    if let Some(session_uuid) = session_uuid {
        let inputs = state.fanout.user_input_event(session_uuid);
        let _ = socket.send(Message::Text(inputs.to_json().into())).await;

        let ready = state
            .db
            .session(session_uuid)
            .is_some_and(|s| {
                s.workspace_export_status == Some(WorkspaceExportStatus::Ready)
                    && s.workspace_manifest_key.is_some()
            });
        if ready {
            if let Some(event) = state.fanout.workspace_files_event(session_uuid).await {
                let _ = socket.send(Message::Text(event.to_json().into())).await;
            }
        }
    }

    loop {
        tokio::select! {
            outbound = outbox.recv() => {
                let Some(payload) = outbound else { break };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                let Some(Ok(message)) = inbound else { break };
                let Message::Text(text) = message else { continue };
                let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };
                handle_session_client_message(&mut socket, &state, &session_id, session_uuid, &value)
                    .await;
            }
        }
    }

    state.registry.disconnect(&ws_key, connection_id).await;
}

async fn handle_session_client_message(
    socket: &mut WebSocket,
    state: &AppState,
    session_id: &str,
    session_uuid: Option<Uuid>,
    value: &Value,
) {
    match value.get("type").and_then(Value::as_str) {
        Some("ping") => {
            let _ = socket
                .send(Message::Text(json!({"type": "pong"}).to_string().into()))
                .await;
        }
        Some("session.snapshot.request") => {
            let event = state.fanout.session_snapshot_event(session_id);
            let _ = socket.send(Message::Text(event.to_json().into())).await;
        }
        Some("workspace.files.request") => {
            if let Some(session_uuid) = session_uuid {
                if let Some(event) = state.fanout.workspace_files_event(session_uuid).await {
                    let _ = socket.send(Message::Text(event.to_json().into())).await;
                }
            }
        }
        Some("workspace.file.url.request") => {
            let path = value.get("path").and_then(Value::as_str).unwrap_or("");
            if let Some(session_uuid) = session_uuid {
                if !path.trim().is_empty() {
                    if let Some(event) = state
                        .fanout
                        .workspace_file_url_event(session_uuid, path)
                        .await
                    {
                        let _ = socket.send(Message::Text(event.to_json().into())).await;
                    }
                }
            }
        }
        _ => {}
    }
}

/// User channel endpoint (skill-import job events).
pub async fn user_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let user = extract_ws_user_id(&headers, &params);
    ws.on_upgrade(move |socket| user_socket(socket, state, user))
}

async fn user_socket(socket: WebSocket, state: AppState, user: Result<String, &'static str>) {
    let user_id = match user {
        Ok(user_id) => user_id,
        Err(reason) => {
            warn!(reason, "user websocket rejected");
            close_forbidden(socket).await;
            return;
        }
    };

    let key = user_channel(&user_id);
    let (connection_id, mut outbox) = state.registry.connect(&key).await;
    let mut socket = socket;

    loop {
        tokio::select! {
            outbound = outbox.recv() => {
                let Some(payload) = outbound else { break };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                let Some(Ok(message)) = inbound else { break };
                let Message::Text(text) = message else { continue };
                let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };
                match value.get("type").and_then(Value::as_str) {
                    Some("ping") => {
                        let _ = socket
                            .send(Message::Text(json!({"type": "pong"}).to_string().into()))
                            .await;
                    }
                    Some("skill_import.job.request") => {
                        let job_id = value
                            .get("job_id")
                            .and_then(Value::as_str)
                            .and_then(|id| Uuid::parse_str(id).ok());
                        if let Some(job_id) = job_id {
                            if let Some(job) = state.db.import_job(job_id) {
                                if job.user_id == user_id {
                                    let event = crate::ws_service::WsFanout::skill_import_job_event(&job);
                                    let _ = socket
                                        .send(Message::Text(event.to_json().into()))
                                        .await;
                                } else {
                                    warn!(
                                        job_id = %job_id,
                                        requesting_user_id = %user_id,
                                        "skill import job request forbidden"
                                    );
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    state.registry.disconnect(&key, connection_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn user_extraction_rules() {
        let mut headers = HeaderMap::new();
        let mut params = HashMap::new();
        assert_eq!(
            extract_ws_user_id(&headers, &params).unwrap(),
            crate::api::DEFAULT_USER_ID
        );

        headers.insert("x-user-id", HeaderValue::from_static("u1"));
        assert_eq!(extract_ws_user_id(&headers, &params).unwrap(), "u1");

        params.insert("user_id".into(), "u2".into());
        assert_eq!(extract_ws_user_id(&headers, &params), Err("user_id_mismatch"));

        params.insert("user_id".into(), "u1".into());
        assert_eq!(extract_ws_user_id(&headers, &params).unwrap(), "u1");
    }

    #[test]
    fn event_types_cover_ws_contract() {
        // Event literal spot-checks used by clients.
        let event = WsEvent::new(EventType::WorkspaceFileUrl, "s", json!({}));
        assert!(event.to_json().contains("workspace.file.url"));
    }
}
