// SPDX-License-Identifier: MIT OR Apache-2.0
//! Mid-run user-input requests.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default time a request stays answerable.
pub const DEFAULT_EXPIRES_SECONDS: i64 = 60;

/// State of a user-input request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserInputStatus {
    /// Waiting for the user.
    Pending,
    /// Answered before expiry.
    Answered,
    /// Deadline passed without an answer.
    Expired,
}

/// A question the executor put to the user mid-run, answered
/// out-of-band through the client API while the executor polls.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UserInputRequest {
    /// Unique request identifier.
    pub id: Uuid,
    /// Session the question belongs to.
    pub session_id: Uuid,
    /// Tool that raised the question.
    pub tool_name: String,
    /// Tool input describing the question(s).
    pub tool_input: Value,
    /// Current state.
    pub status: UserInputStatus,
    /// User-provided answers, once answered.
    pub answers: Option<Value>,
    /// Deadline after which the request expires.
    pub expires_at: DateTime<Utc>,
    /// When the user answered.
    pub answered_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl UserInputRequest {
    /// New pending request expiring `expires_at` (default now+60s).
    #[must_use]
    pub fn new(
        session_id: Uuid,
        tool_name: impl Into<String>,
        tool_input: Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            tool_name: tool_name.into(),
            tool_input,
            status: UserInputStatus::Pending,
            answers: None,
            expires_at: expires_at
                .unwrap_or_else(|| now + Duration::seconds(DEFAULT_EXPIRES_SECONDS)),
            answered_at: None,
            created_at: now,
        }
    }

    /// Whether the deadline has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_expiry_is_sixty_seconds() {
        let request = UserInputRequest::new(Uuid::new_v4(), "AskUserQuestion", json!({}), None);
        let ttl = request.expires_at - request.created_at;
        assert_eq!(ttl.num_seconds(), DEFAULT_EXPIRES_SECONDS);
        assert_eq!(request.status, UserInputStatus::Pending);
    }

    #[test]
    fn expiry_check_is_inclusive() {
        let request = UserInputRequest::new(Uuid::new_v4(), "t", json!({}), None);
        assert!(request.is_expired_at(request.expires_at));
        assert!(!request.is_expired_at(request.expires_at - Duration::seconds(1)));
    }
}
