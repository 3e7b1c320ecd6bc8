// SPDX-License-Identifier: MIT OR Apache-2.0
//! User-input request broker.
//!
//! The executor creates a pending request through the Manager proxy and
//! polls it; the user answers through the client API. Expiry is lazy:
//! reads past the deadline flip `pending → expired`. Every transition
//! broadcasts `user_input.update` for the session.

use crate::repo::Database;
use crate::sessions;
use crate::ws_service::WsFanout;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use swb_core::{UserInputRequest, UserInputStatus};
use swb_error::{Error, Result};
use uuid::Uuid;

/// Create payload for a user-input request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateInputRequest {
    /// Session the question belongs to.
    pub session_id: Uuid,
    /// Tool raising the question.
    pub tool_name: String,
    /// Question payload.
    #[serde(default)]
    pub tool_input: Value,
    /// Explicit deadline; defaults to now + 60s.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Answer payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerInputRequest {
    /// The user's answers.
    pub answers: Value,
}

/// Create a pending request and broadcast the update.
pub async fn create_request(
    db: &Database,
    fanout: &Arc<WsFanout>,
    payload: CreateInputRequest,
) -> Result<UserInputRequest> {
    sessions::get_session(db, payload.session_id)?;
    let request = UserInputRequest::new(
        payload.session_id,
        payload.tool_name,
        payload.tool_input,
        payload.expires_at,
    );
    db.insert_input_request(request.clone());
    fanout.broadcast_user_input(request.session_id).await;
    Ok(request)
}

/// Fetch a request, lazily expiring it when the deadline has passed.
pub async fn get_request(
    db: &Database,
    fanout: &Arc<WsFanout>,
    request_id: Uuid,
) -> Result<UserInputRequest> {
    let request = db
        .input_request(request_id)
        .ok_or_else(|| Error::not_found(format!("User input request not found: {request_id}")))?;

    if request.status == UserInputStatus::Pending && request.is_expired_at(Utc::now()) {
        let expired = db
            .update_input_request(request_id, |r| r.status = UserInputStatus::Expired)
            .unwrap_or(request);
        fanout.broadcast_user_input(expired.session_id).await;
        return Ok(expired);
    }
    Ok(request)
}

/// Answer a pending request on behalf of `user_id`.
pub async fn answer_request(
    db: &Database,
    fanout: &Arc<WsFanout>,
    user_id: &str,
    request_id: Uuid,
    payload: AnswerInputRequest,
) -> Result<UserInputRequest> {
    let request = db
        .input_request(request_id)
        .ok_or_else(|| Error::not_found(format!("User input request not found: {request_id}")))?;

    let session = sessions::get_session(db, request.session_id)?;
    if session.user_id != user_id {
        return Err(Error::forbidden("Session does not belong to the user"));
    }

    if request.status != UserInputStatus::Pending {
        return Err(Error::bad_request(format!(
            "Request is not pending: {:?}",
            request.status
        )));
    }

    let now = Utc::now();
    if request.is_expired_at(now) {
        db.update_input_request(request_id, |r| r.status = UserInputStatus::Expired);
        fanout.broadcast_user_input(request.session_id).await;
        return Err(Error::bad_request("Request expired"));
    }

    let answered = db
        .update_input_request(request_id, |r| {
            r.answers = Some(payload.answers.clone());
            r.status = UserInputStatus::Answered;
            r.answered_at = Some(now);
        })
        .ok_or_else(|| Error::not_found(format!("User input request not found: {request_id}")))?;
    fanout.broadcast_user_input(answered.session_id).await;
    Ok(answered)
}

/// Pending requests for every session owned by `user_id`, optionally
/// narrowed to one session.
pub fn list_pending_for_user(
    db: &Database,
    user_id: &str,
    session_id: Option<Uuid>,
) -> Vec<UserInputRequest> {
    match session_id {
        Some(session_id) => db
            .session(session_id)
            .filter(|s| s.user_id == user_id)
            .map(|s| db.pending_input_requests(s.session_id))
            .unwrap_or_default(),
        None => db
            .sessions_for_user(user_id, usize::MAX, 0)
            .into_iter()
            .flat_map(|s| db.pending_input_requests(s.session_id))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::create_session;
    use crate::ws::ConnectionRegistry;
    use serde_json::json;
    use swb_core::TaskConfig;
    use swb_store::MemoryStore;

    fn fixture() -> (Arc<Database>, Arc<WsFanout>, Uuid) {
        let db = Arc::new(Database::new());
        let fanout = Arc::new(WsFanout::new(
            db.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(ConnectionRegistry::new()),
        ));
        let session = create_session(&db, "u1", TaskConfig::for_user("u1"), None);
        (db, fanout, session.session_id)
    }

    #[tokio::test]
    async fn answer_happy_path() {
        let (db, fanout, session_id) = fixture();
        let request = create_request(
            &db,
            &fanout,
            CreateInputRequest {
                session_id,
                tool_name: "AskUserQuestion".into(),
                tool_input: json!({"questions": ["Proceed?"]}),
                expires_at: None,
            },
        )
        .await
        .unwrap();

        let answered = answer_request(
            &db,
            &fanout,
            "u1",
            request.id,
            AnswerInputRequest {
                answers: json!({"q1": "yes"}),
            },
        )
        .await
        .unwrap();
        assert_eq!(answered.status, UserInputStatus::Answered);
        assert_eq!(answered.answers.unwrap()["q1"], "yes");

        let fetched = get_request(&db, &fanout, request.id).await.unwrap();
        assert_eq!(fetched.status, UserInputStatus::Answered);
    }

    #[tokio::test]
    async fn read_past_deadline_expires() {
        let (db, fanout, session_id) = fixture();
        let request = create_request(
            &db,
            &fanout,
            CreateInputRequest {
                session_id,
                tool_name: "t".into(),
                tool_input: json!({}),
                expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            },
        )
        .await
        .unwrap();

        let fetched = get_request(&db, &fanout, request.id).await.unwrap();
        assert_eq!(fetched.status, UserInputStatus::Expired);

        let err = answer_request(
            &db,
            &fanout,
            "u1",
            request.id,
            AnswerInputRequest { answers: json!({}) },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, swb_error::ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn foreign_user_cannot_answer() {
        let (db, fanout, session_id) = fixture();
        let request = create_request(
            &db,
            &fanout,
            CreateInputRequest {
                session_id,
                tool_name: "t".into(),
                tool_input: json!({}),
                expires_at: None,
            },
        )
        .await
        .unwrap();
        let err = answer_request(
            &db,
            &fanout,
            "intruder",
            request.id,
            AnswerInputRequest { answers: json!({}) },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, swb_error::ErrorKind::Forbidden);
    }
}
