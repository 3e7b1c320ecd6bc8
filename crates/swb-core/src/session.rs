// SPDX-License-Identifier: MIT OR Apache-2.0
//! Session records.

use crate::config::TaskConfig;
use crate::state::AgentState;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, no run dispatched yet.
    Pending,
    /// A run is executing.
    Running,
    /// Last run finished successfully.
    Completed,
    /// Last run failed or was canceled.
    Failed,
}

impl SessionStatus {
    /// Whether this state admits no further run transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// State of the post-run workspace export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceExportStatus {
    /// Export scheduled but not finished.
    Pending,
    /// Manifest and files are available in the blob store.
    Ready,
    /// Export failed; no usable manifest.
    Failed,
}

/// A conversational thread persisted across runs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Session {
    /// Unique session identifier.
    pub session_id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Opaque resumable token assigned by the agent SDK, first non-null
    /// value wins.
    pub sdk_session_id: Option<String>,
    /// Config captured at creation; claims carry this snapshot.
    pub config_snapshot: TaskConfig,
    /// Latest agent state patch; replaced wholesale on each callback.
    pub state_patch: Option<AgentState>,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Blob-store prefix under which workspace files were exported.
    pub workspace_files_prefix: Option<String>,
    /// Blob-store key of the exported manifest JSON.
    pub workspace_manifest_key: Option<String>,
    /// Blob-store key of the exported archive.
    pub workspace_archive_key: Option<String>,
    /// State of the workspace export.
    pub workspace_export_status: Option<WorkspaceExportStatus>,
    /// Display title derived from the first prompt.
    pub title: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a pending session for `user_id` with the given config.
    #[must_use]
    pub fn new(user_id: impl Into<String>, config_snapshot: TaskConfig) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            sdk_session_id: None,
            config_snapshot,
            state_patch: None,
            status: SessionStatus::Pending,
            workspace_files_prefix: None,
            workspace_manifest_key: None,
            workspace_archive_key: None,
            workspace_export_status: None,
            title: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derive a session title from the first prompt: the first line,
/// truncated to 80 characters on a char boundary.
#[must_use]
pub fn title_from_prompt(prompt: &str) -> Option<String> {
    let line = prompt.lines().next()?.trim();
    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(80).collect())
}
