// SPDX-License-Identifier: MIT OR Apache-2.0
//! Executor callback wire types.

use crate::session::WorkspaceExportStatus;
use crate::state::AgentState;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Status reported on an executor callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    /// Task accepted, not yet executing.
    Accepted,
    /// Task executing.
    Running,
    /// Task finished successfully.
    Completed,
    /// Task finished with an error.
    Failed,
}

impl CallbackStatus {
    /// Whether this status ends the run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One executor-originated progress/state update. Flows Executor →
/// Manager → Backend; the Manager sanitizes `state_patch` and fills the
/// `workspace_*` fields on terminal and export callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentCallback {
    /// SDK session id or session UUID; the Backend resolves either.
    pub session_id: String,
    /// When the executor emitted the callback.
    pub time: DateTime<Utc>,
    /// Reported status.
    pub status: CallbackStatus,
    /// Progress, 0-100.
    pub progress: u8,
    /// Raw message to persist, when one was produced.
    #[serde(default)]
    pub new_message: Option<Value>,
    /// Replacement agent state.
    #[serde(default)]
    pub state_patch: Option<AgentState>,
    /// SDK session id assignment.
    #[serde(default)]
    pub sdk_session_id: Option<String>,
    /// Blob prefix of exported workspace files.
    #[serde(default)]
    pub workspace_files_prefix: Option<String>,
    /// Blob key of the exported manifest.
    #[serde(default)]
    pub workspace_manifest_key: Option<String>,
    /// Blob key of the exported archive.
    #[serde(default)]
    pub workspace_archive_key: Option<String>,
    /// Export state carried to the Backend.
    #[serde(default)]
    pub workspace_export_status: Option<WorkspaceExportStatus>,
}

impl AgentCallback {
    /// Minimal callback for `session_id` with the given status/progress.
    #[must_use]
    pub fn status_only(session_id: impl Into<String>, status: CallbackStatus, progress: u8) -> Self {
        Self {
            session_id: session_id.into(),
            time: Utc::now(),
            status,
            progress,
            new_message: None,
            state_patch: None,
            sdk_session_id: None,
            workspace_files_prefix: None,
            workspace_manifest_key: None,
            workspace_archive_key: None,
            workspace_export_status: None,
        }
    }
}

/// Acknowledgment the Manager returns to the executor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CallbackReceipt {
    /// Always `"received"`.
    pub status: String,
    /// Echoed session id.
    pub session_id: String,
    /// Echoed callback status.
    pub callback_status: CallbackStatus,
    /// Echoed progress.
    pub progress: u8,
}

/// Result of Backend-side callback processing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CallbackResponse {
    /// Resolved session id (UUID form when the session was found).
    pub session_id: String,
    /// Session status after processing.
    pub status: String,
    /// Echoed callback status.
    #[serde(default)]
    pub callback_status: Option<CallbackStatus>,
    /// Additional detail, e.g. for unknown sessions.
    #[serde(default)]
    pub message: Option<String>,
}
