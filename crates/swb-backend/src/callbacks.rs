// SPDX-License-Identifier: MIT OR Apache-2.0
//! Backend-side callback processing.
//!
//! One callback may carry a status change, an sdk-session-id
//! assignment, a state patch, workspace export results, and a new
//! message whose content blocks drive tool-execution upserts and usage
//! logging. Everything here is synchronous over the in-memory stores;
//! WebSocket fan-out happens afterwards from the handler.

use crate::repo::{Database, StoredMessage, ToolExecutionRow, UsageRow};
use crate::sessions::{self, SessionUpdate};
use chrono::Utc;
use swb_core::{
    AgentCallback, AgentMessage, CallbackResponse, CallbackStatus, ContentBlock, Session,
    SessionStatus,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome handed back to the API layer for fan-out.
pub struct CallbackOutcome {
    /// Response body for the Manager.
    pub response: CallbackResponse,
    /// The session after processing, when it was found.
    pub session: Option<Session>,
    /// The message persisted by this callback, if any.
    pub message: Option<StoredMessage>,
}

fn persist_tool_blocks(db: &Database, session_id: Uuid, message: &AgentMessage, message_id: i64) {
    for block in message.content() {
        match block {
            ContentBlock::ToolUseBlock { id, name, input } => {
                if id.is_empty() || name.is_empty() {
                    continue;
                }
                let updated = db.update_tool_execution(session_id, id, |row| {
                    row.tool_name = name.clone();
                    row.tool_input = Some(input.clone());
                    row.message_id = message_id;
                });
                if updated.is_some() {
                    debug!(tool_use_id = %id, message_id, "tool execution updated");
                    continue;
                }
                db.insert_tool_execution(ToolExecutionRow {
                    id: Uuid::new_v4(),
                    session_id,
                    tool_use_id: id.clone(),
                    message_id,
                    tool_name: name.clone(),
                    tool_input: Some(input.clone()),
                    tool_output: None,
                    is_error: false,
                    result_message_id: None,
                    duration_ms: None,
                    created_at: Utc::now(),
                });
                debug!(tool_use_id = %id, tool = %name, message_id, "tool execution created");
            }
            ContentBlock::ToolResultBlock {
                tool_use_id,
                content,
                is_error,
            } => {
                if tool_use_id.is_empty() {
                    continue;
                }
                let output = content
                    .clone()
                    .map(|value| serde_json::json!({"content": value}));
                let updated = db.update_tool_execution(session_id, tool_use_id, |row| {
                    row.tool_output = output.clone();
                    row.result_message_id = Some(message_id);
                    row.is_error = *is_error;
                    if row.duration_ms.is_none() {
                        let elapsed = Utc::now() - row.created_at;
                        row.duration_ms = Some(elapsed.num_milliseconds());
                    }
                });
                if updated.is_some() {
                    debug!(tool_use_id = %tool_use_id, message_id, "tool execution result updated");
                    continue;
                }
                // Result arrived before the use block: placeholder row.
                db.insert_tool_execution(ToolExecutionRow {
                    id: Uuid::new_v4(),
                    session_id,
                    tool_use_id: tool_use_id.clone(),
                    message_id,
                    tool_name: "unknown".to_string(),
                    tool_input: None,
                    tool_output: output,
                    is_error: *is_error,
                    result_message_id: Some(message_id),
                    duration_ms: None,
                    created_at: Utc::now(),
                });
                debug!(tool_use_id = %tool_use_id, message_id, "tool execution placeholder created");
            }
            _ => {}
        }
    }
}

fn persist_usage(db: &Database, session_id: Uuid, message: &AgentMessage) {
    let Some(report) = message.usage() else { return };
    let row = UsageRow {
        id: Uuid::new_v4(),
        session_id,
        total_cost_usd: report.total_cost_usd,
        input_tokens: report.input_tokens(),
        output_tokens: report.output_tokens(),
        duration_ms: report.duration_ms,
        usage: report.usage.clone(),
        created_at: Utc::now(),
    };
    info!(
        session_id = %session_id,
        cost_usd = row.total_cost_usd,
        input_tokens = row.input_tokens,
        output_tokens = row.output_tokens,
        duration_ms = row.duration_ms,
        "usage log persisted"
    );
    db.append_usage(row);
}

/// Process one forwarded callback against the stores.
pub fn process_agent_callback(db: &Database, callback: &AgentCallback) -> CallbackOutcome {
    let Some(session) = sessions::find_by_sdk_id_or_uuid(db, &callback.session_id) else {
        warn!(session_id = %callback.session_id, "session not found for callback");
        return CallbackOutcome {
            response: CallbackResponse {
                session_id: callback.session_id.clone(),
                status: "callback_received".to_string(),
                callback_status: Some(callback.status),
                message: Some("Session not found yet".to_string()),
            },
            session: None,
            message: None,
        };
    };
    let session_id = session.session_id;

    let parsed_message = callback.new_message.as_ref().map(AgentMessage::from_value);

    // Sdk-session-id assignment: explicit field first, then whatever the
    // message carries. First non-null wins; reassignment is ignored.
    let derived_sdk_id = if session.sdk_session_id.is_none() {
        callback.sdk_session_id.clone().or_else(|| {
            parsed_message
                .as_ref()
                .and_then(|m| m.sdk_session_id().map(str::to_string))
        })
    } else {
        None
    };

    let mut update = SessionUpdate::default();
    if let Some(sdk_id) = derived_sdk_id {
        info!(session_id = %session_id, sdk_session_id = %sdk_id, "sdk session id assigned");
        update.sdk_session_id = Some(sdk_id);
    }
    if callback.status.is_terminal() {
        update.status = Some(match callback.status {
            CallbackStatus::Completed => SessionStatus::Completed,
            _ => SessionStatus::Failed,
        });
    }
    update.state_patch = callback.state_patch.clone();
    update.workspace_files_prefix = callback.workspace_files_prefix.clone();
    update.workspace_manifest_key = callback.workspace_manifest_key.clone();
    update.workspace_archive_key = callback.workspace_archive_key.clone();
    update.workspace_export_status = callback.workspace_export_status;

    let session = sessions::update_session(db, session_id, update).unwrap_or(session);

    let stored_message = parsed_message.as_ref().and_then(|message| {
        let raw = callback.new_message.as_ref()?;
        let stored = db.append_message(
            session_id,
            message.role(),
            raw.clone(),
            message.text_preview(),
        );
        info!(
            session_id = %session_id,
            message_id = stored.id,
            role = %stored.role,
            "message persisted"
        );
        persist_tool_blocks(db, session_id, message, stored.id);
        persist_usage(db, session_id, message);
        Some(stored)
    });

    db.runs
        .sync_from_callback(session_id, callback.status, callback.progress);

    CallbackOutcome {
        response: CallbackResponse {
            session_id: session_id.to_string(),
            status: session.status.to_string(),
            callback_status: Some(callback.status),
            message: None,
        },
        session: Some(session),
        message: stored_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::create_session;
    use serde_json::json;
    use swb_core::{NewRun, ScheduleMode, TaskConfig};

    fn callback_with_message(session_id: &str, message: serde_json::Value) -> AgentCallback {
        AgentCallback {
            new_message: Some(message),
            ..AgentCallback::status_only(session_id, CallbackStatus::Running, 50)
        }
    }

    fn setup() -> (Database, Session) {
        let db = Database::new();
        let session = create_session(&db, "u1", TaskConfig::for_user("u1"), Some("hi"));
        (db, session)
    }

    #[test]
    fn unknown_session_is_acknowledged() {
        let db = Database::new();
        let callback = AgentCallback::status_only("missing", CallbackStatus::Running, 10);
        let outcome = process_agent_callback(&db, &callback);
        assert!(outcome.session.is_none());
        assert_eq!(outcome.response.message.as_deref(), Some("Session not found yet"));
    }

    #[test]
    fn use_then_result_yields_one_complete_row() {
        let (db, session) = setup();
        let sid = session.session_id;

        let use_cb = callback_with_message(
            &sid.to_string(),
            json!({
                "_type": "AssistantMessage",
                "content": [{"_type": "ToolUseBlock", "id": "t1", "name": "Bash", "input": {"cmd": "ls"}}]
            }),
        );
        process_agent_callback(&db, &use_cb);

        let result_cb = callback_with_message(
            &sid.to_string(),
            json!({
                "_type": "UserMessage",
                "content": [{"_type": "ToolResultBlock", "tool_use_id": "t1", "content": "ok", "is_error": false}]
            }),
        );
        process_agent_callback(&db, &result_cb);

        let rows = db.tool_executions_for_session(sid);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.tool_name, "Bash");
        assert_eq!(row.tool_input.as_ref().unwrap()["cmd"], "ls");
        assert_eq!(row.tool_output.as_ref().unwrap()["content"], "ok");
        assert!(row.result_message_id.is_some());
        assert!(row.duration_ms.is_some());
    }

    #[test]
    fn result_before_use_in_one_message_ends_complete() {
        let (db, session) = setup();
        let sid = session.session_id;

        let cb = callback_with_message(
            &sid.to_string(),
            json!({
                "_type": "AssistantMessage",
                "content": [
                    {"_type": "ToolResultBlock", "tool_use_id": "t9", "content": "out"},
                    {"_type": "ToolUseBlock", "id": "t9", "name": "Grep", "input": {"q": "x"}}
                ]
            }),
        );
        process_agent_callback(&db, &cb);

        let rows = db.tool_executions_for_session(sid);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tool_name, "Grep");
        assert!(rows[0].tool_input.is_some());
        assert!(rows[0].tool_output.is_some());
    }

    #[test]
    fn terminal_callback_updates_session_and_run() {
        let (db, session) = setup();
        let sid = session.session_id;
        db.runs.enqueue(NewRun {
            session_id: sid,
            prompt: "hi".into(),
            schedule_mode: ScheduleMode::Immediate,
            scheduled_at: None,
        });
        db.runs.claim("w1", 30, &[ScheduleMode::Immediate]).unwrap();

        let cb = AgentCallback::status_only(&sid.to_string(), CallbackStatus::Completed, 90);
        let outcome = process_agent_callback(&db, &cb);
        assert_eq!(outcome.session.unwrap().status, SessionStatus::Completed);
        let run = db.runs.latest_for_session(sid).unwrap();
        assert_eq!(run.progress, 100);
    }

    #[test]
    fn sdk_session_id_is_one_way() {
        let (db, session) = setup();
        let sid = session.session_id;

        let cb = callback_with_message(
            &sid.to_string(),
            json!({"_type": "ResultMessage", "session_id": "sdk-1", "usage": {"input_tokens": 10, "output_tokens": 2}}),
        );
        process_agent_callback(&db, &cb);
        assert_eq!(db.session(sid).unwrap().sdk_session_id.as_deref(), Some("sdk-1"));

        // Usage was also captured.
        let usage = db.usage_for_session(sid);
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].input_tokens, Some(10));

        // Callbacks addressed by sdk id resolve the same session.
        let by_sdk = AgentCallback::status_only("sdk-1", CallbackStatus::Running, 5);
        let outcome = process_agent_callback(&db, &by_sdk);
        assert_eq!(outcome.session.unwrap().session_id, sid);
    }
}
