// SPDX-License-Identifier: MIT OR Apache-2.0
//! Session management.

use crate::repo::Database;
use serde::Deserialize;
use serde_json::Value;
use swb_core::{
    AgentState, Session, SessionStatus, TaskConfig, WorkspaceExportStatus,
    session::title_from_prompt,
};
use swb_error::{Error, Result};
use tracing::info;
use uuid::Uuid;

/// Partial session update, applied field-by-field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionUpdate {
    /// New lifecycle state.
    pub status: Option<SessionStatus>,
    /// SDK session id assignment.
    pub sdk_session_id: Option<String>,
    /// Replacement state patch.
    pub state_patch: Option<AgentState>,
    /// Export file prefix.
    pub workspace_files_prefix: Option<String>,
    /// Export manifest key.
    pub workspace_manifest_key: Option<String>,
    /// Export archive key.
    pub workspace_archive_key: Option<String>,
    /// Export state.
    pub workspace_export_status: Option<WorkspaceExportStatus>,
    /// Display title.
    pub title: Option<String>,
}

/// Create a session for `user_id`, deriving a title from `prompt` when
/// one is given.
pub fn create_session(
    db: &Database,
    user_id: &str,
    config: TaskConfig,
    prompt: Option<&str>,
) -> Session {
    let mut session = Session::new(user_id, config);
    session.title = prompt.and_then(title_from_prompt);
    db.insert_session(session.clone());
    info!(session_id = %session.session_id, user_id, "session created");
    session
}

/// Fetch a session, failing with `NOT_FOUND`.
pub fn get_session(db: &Database, session_id: Uuid) -> Result<Session> {
    db.session(session_id)
        .ok_or_else(|| Error::not_found(format!("Session not found: {session_id}")))
}

/// Fetch a session owned by `user_id`, failing with `FORBIDDEN` on a
/// mismatch.
pub fn get_owned_session(db: &Database, session_id: Uuid, user_id: &str) -> Result<Session> {
    let session = get_session(db, session_id)?;
    if session.user_id != user_id {
        return Err(Error::forbidden("Session does not belong to the user"));
    }
    Ok(session)
}

/// Resolve a session by SDK session id first, then by UUID.
pub fn find_by_sdk_id_or_uuid(db: &Database, session_id: &str) -> Option<Session> {
    if let Some(session) = db.session_by_sdk_id(session_id) {
        return Some(session);
    }
    Uuid::parse_str(session_id).ok().and_then(|id| db.session(id))
}

/// Apply a partial update.
pub fn update_session(db: &Database, session_id: Uuid, update: SessionUpdate) -> Result<Session> {
    db.update_session(session_id, |session| {
        if let Some(status) = update.status {
            session.status = status;
        }
        if let Some(sdk_session_id) = update.sdk_session_id {
            session.sdk_session_id = Some(sdk_session_id);
        }
        if let Some(state_patch) = update.state_patch {
            session.state_patch = Some(state_patch);
        }
        if let Some(prefix) = update.workspace_files_prefix {
            session.workspace_files_prefix = Some(prefix);
        }
        if let Some(key) = update.workspace_manifest_key {
            session.workspace_manifest_key = Some(key);
        }
        if let Some(key) = update.workspace_archive_key {
            session.workspace_archive_key = Some(key);
        }
        if let Some(status) = update.workspace_export_status {
            session.workspace_export_status = Some(status);
        }
        if let Some(title) = update.title {
            session.title = Some(title);
        }
    })
    .ok_or_else(|| Error::not_found(format!("Session not found: {session_id}")))
}

/// Session state payload served by `GET /sessions/{id}/state`.
#[must_use]
pub fn session_state_payload(session: &Session) -> Value {
    serde_json::json!({
        "session_id": session.session_id,
        "status": session.status,
        "state_patch": session.state_patch,
        "workspace_export_status": session.workspace_export_status,
        "workspace_manifest_key": session.workspace_manifest_key,
        "workspace_files_prefix": session.workspace_files_prefix,
        "updated_at": session.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_derives_title_from_prompt() {
        let db = Database::new();
        let session = create_session(&db, "u1", TaskConfig::for_user("u1"), Some("do the thing\nplease"));
        assert_eq!(session.title.as_deref(), Some("do the thing"));
    }

    #[test]
    fn ownership_is_enforced() {
        let db = Database::new();
        let session = create_session(&db, "u1", TaskConfig::for_user("u1"), None);
        assert!(get_owned_session(&db, session.session_id, "u1").is_ok());
        let err = get_owned_session(&db, session.session_id, "u2").unwrap_err();
        assert_eq!(err.kind, swb_error::ErrorKind::Forbidden);
    }

    #[test]
    fn find_by_sdk_id_falls_back_to_uuid() {
        let db = Database::new();
        let session = create_session(&db, "u1", TaskConfig::for_user("u1"), None);
        let by_uuid = find_by_sdk_id_or_uuid(&db, &session.session_id.to_string()).unwrap();
        assert_eq!(by_uuid.session_id, session.session_id);

        update_session(
            &db,
            session.session_id,
            SessionUpdate {
                sdk_session_id: Some("sdk-1".into()),
                ..SessionUpdate::default()
            },
        )
        .unwrap();
        let by_sdk = find_by_sdk_id_or_uuid(&db, "sdk-1").unwrap();
        assert_eq!(by_sdk.session_id, session.session_id);
    }
}
