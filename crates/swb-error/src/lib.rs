// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes.
//!
//! Every service error carries an [`ErrorKind`] (a machine-readable,
//! stable `SCREAMING_SNAKE_CASE` tag), a human-readable message, and
//! optional structured details. API surfaces wrap both successes and
//! failures in the uniform [`Envelope`]; the HTTP status derives from
//! the kind.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The requested entity does not exist.
    NotFound,
    /// The caller does not own the entity or lacks the internal token.
    Forbidden,
    /// The request is well-formed but not valid in the current state.
    BadRequest,
    /// The request payload failed validation.
    InvalidInput,
    /// The caller no longer holds the run's lease.
    LeaseLost,
    /// `${env:NAME}` referenced a variable the user has not set.
    EnvVarNotFound,
    /// An MCP `$ref` named a missing or inactive preset.
    McpPresetNotFound,
    /// A skill `$ref` named a missing or inactive preset.
    SkillPresetNotFound,
    /// A staged skill could not be downloaded from the blob store.
    SkillDownloadFailed,
    /// The workspace or a file within it does not exist.
    WorkspaceNotFound,
    /// Archiving a workspace failed.
    WorkspaceArchiveFailed,
    /// Deleting a workspace failed.
    WorkspaceDeleteFailed,
    /// Forwarding an executor callback to the Backend failed.
    CallbackForwardFailed,
    /// Session creation against the Backend failed.
    SessionCreateFailed,
    /// The referenced task does not exist.
    TaskNotFound,
    /// The task could not be scheduled for execution.
    TaskSchedulingFailed,
    /// The Backend did not respond.
    BackendUnavailable,
    /// A downstream service (blob store, executor, ...) failed.
    ExternalServiceError,
}

impl ErrorKind {
    /// Stable string code, guaranteed not to change across releases.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::BadRequest => "BAD_REQUEST",
            Self::InvalidInput => "INVALID_INPUT",
            Self::LeaseLost => "LEASE_LOST",
            Self::EnvVarNotFound => "ENV_VAR_NOT_FOUND",
            Self::McpPresetNotFound => "MCP_PRESET_NOT_FOUND",
            Self::SkillPresetNotFound => "SKILL_PRESET_NOT_FOUND",
            Self::SkillDownloadFailed => "SKILL_DOWNLOAD_FAILED",
            Self::WorkspaceNotFound => "WORKSPACE_NOT_FOUND",
            Self::WorkspaceArchiveFailed => "WORKSPACE_ARCHIVE_FAILED",
            Self::WorkspaceDeleteFailed => "WORKSPACE_DELETE_FAILED",
            Self::CallbackForwardFailed => "CALLBACK_FORWARD_FAILED",
            Self::SessionCreateFailed => "SESSION_CREATE_FAILED",
            Self::TaskNotFound => "TASK_NOT_FOUND",
            Self::TaskSchedulingFailed => "TASK_SCHEDULING_FAILED",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::ExternalServiceError => "EXTERNAL_SERVICE_ERROR",
        }
    }

    /// HTTP status this kind maps to on API surfaces.
    #[must_use]
    pub fn http_status(self) -> StatusCode {
        match self {
            Self::NotFound | Self::TaskNotFound | Self::WorkspaceNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest
            | Self::InvalidInput
            | Self::EnvVarNotFound
            | Self::McpPresetNotFound
            | Self::SkillPresetNotFound => StatusCode::BAD_REQUEST,
            Self::LeaseLost => StatusCode::CONFLICT,
            Self::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::SkillDownloadFailed
            | Self::WorkspaceArchiveFailed
            | Self::WorkspaceDeleteFailed
            | Self::CallbackForwardFailed
            | Self::SessionCreateFailed
            | Self::TaskSchedulingFailed
            | Self::ExternalServiceError => StatusCode::BAD_GATEWAY,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// A service error: stable kind plus human-readable context.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    /// Stable error code.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Optional structured context.
    pub details: Option<Value>,
}

impl Error {
    /// Build an error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured context.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// `NOT_FOUND` convenience constructor.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// `FORBIDDEN` convenience constructor.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// `BAD_REQUEST` convenience constructor.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// `LEASE_LOST` convenience constructor.
    pub fn lease_lost(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LeaseLost, message)
    }

    /// `EXTERNAL_SERVICE_ERROR` convenience constructor.
    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalServiceError, message)
    }
}

/// Shorthand result type for service operations.
pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Uniform API response envelope used by every HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// `"OK"` on success, the stable error code otherwise.
    pub code: String,
    /// Human-readable summary.
    pub message: String,
    /// Response payload.
    pub data: Option<T>,
    /// Structured error context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl<T: Serialize> Envelope<T> {
    /// Successful envelope wrapping `data`.
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "OK".to_string(),
            message: message.into(),
            data: Some(data),
            details: None,
        }
    }
}

impl Envelope<Value> {
    /// Failure envelope for `error`.
    #[must_use]
    pub fn failure(error: &Error) -> Self {
        Self {
            success: false,
            code: error.kind.code().to_string(),
            message: error.message.clone(),
            data: None,
            details: error.details.clone(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.kind.http_status();
        (status, Json(Envelope::failure(&self))).into_response()
    }
}

/// Build a success response: HTTP 200 with a success [`Envelope`].
pub fn ok<T: Serialize>(data: T, message: impl Into<String>) -> Response {
    Json(Envelope::success(data, message)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_screaming_snake() {
        assert_eq!(ErrorKind::LeaseLost.code(), "LEASE_LOST");
        assert_eq!(
            serde_json::to_string(&ErrorKind::McpPresetNotFound).unwrap(),
            "\"MCP_PRESET_NOT_FOUND\""
        );
        let parsed: ErrorKind = serde_json::from_str("\"ENV_VAR_NOT_FOUND\"").unwrap();
        assert_eq!(parsed, ErrorKind::EnvVarNotFound);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ErrorKind::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::LeaseLost.http_status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorKind::BackendUnavailable.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorKind::ExternalServiceError.http_status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn failure_envelope_carries_code_and_details() {
        let error = Error::bad_request("invalid skill name")
            .with_details(serde_json::json!({"name": "../etc"}));
        let envelope = Envelope::failure(&error);
        assert!(!envelope.success);
        assert_eq!(envelope.code, "BAD_REQUEST");
        assert_eq!(envelope.details.unwrap()["name"], "../etc");
    }
}
