// SPDX-License-Identifier: MIT OR Apache-2.0
//! Agent state patches: todos, MCP server status, and workspace changes.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One entry in the agent's todo list.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TodoItem {
    /// Task description.
    pub content: String,
    /// Task state as reported by the agent.
    pub status: String,
    /// Present-continuous form shown while in progress.
    #[serde(default)]
    pub active_form: Option<String>,
}

/// Health of one MCP server as seen by the agent runtime.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct McpStatus {
    /// Server name.
    pub server_name: String,
    /// Connection state.
    pub status: String,
    /// Optional detail, e.g. an error message.
    #[serde(default)]
    pub message: Option<String>,
}

/// One changed file in the agent's workspace.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FileChange {
    /// Workspace-relative path of the changed file.
    pub path: String,
    /// Change kind: added, modified, staged, deleted, or renamed.
    pub status: String,
    /// Lines added.
    #[serde(default)]
    pub added_lines: i64,
    /// Lines deleted.
    #[serde(default)]
    pub deleted_lines: i64,
    /// Unified diff, when the executor includes one.
    #[serde(default)]
    pub diff: Option<String>,
    /// Previous path for renames.
    #[serde(default)]
    pub old_path: Option<String>,
}

/// Snapshot of the workspace portion of the agent state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkspaceState {
    /// Repository identifier, if the workspace is a checkout.
    #[serde(default)]
    pub repository: Option<String>,
    /// Checked-out branch.
    #[serde(default)]
    pub branch: Option<String>,
    /// Sum of `added_lines` over `file_changes`.
    #[serde(default)]
    pub total_added_lines: i64,
    /// Sum of `deleted_lines` over `file_changes`.
    #[serde(default)]
    pub total_deleted_lines: i64,
    /// Per-file change records.
    #[serde(default)]
    pub file_changes: Vec<FileChange>,
    /// When the workspace last changed.
    pub last_change: DateTime<Utc>,
}

impl WorkspaceState {
    /// Recompute `total_added_lines`/`total_deleted_lines` from the
    /// current `file_changes`.
    pub fn recompute_totals(&mut self) {
        self.total_added_lines = self.file_changes.iter().map(|c| c.added_lines).sum();
        self.total_deleted_lines = self.file_changes.iter().map(|c| c.deleted_lines).sum();
    }
}

/// Replaceable snapshot of what the agent is currently doing. Carried on
/// callbacks and persisted on the session verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AgentState {
    /// Current todo list.
    #[serde(default)]
    pub todos: Vec<TodoItem>,
    /// MCP server health.
    #[serde(default)]
    pub mcp_status: Vec<McpStatus>,
    /// Workspace change summary.
    #[serde(default)]
    pub workspace_state: Option<WorkspaceState>,
    /// Human-readable description of the current step.
    #[serde(default)]
    pub current_step: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str, added: i64, deleted: i64) -> FileChange {
        FileChange {
            path: path.into(),
            status: "modified".into(),
            added_lines: added,
            deleted_lines: deleted,
            diff: None,
            old_path: None,
        }
    }

    #[test]
    fn totals_follow_file_changes() {
        let mut state = WorkspaceState {
            repository: None,
            branch: None,
            total_added_lines: 99,
            total_deleted_lines: 99,
            file_changes: vec![change("a.rs", 3, 1), change("b.rs", 4, 0)],
            last_change: Utc::now(),
        };
        state.recompute_totals();
        assert_eq!(state.total_added_lines, 7);
        assert_eq!(state.total_deleted_lines, 1);
    }
}
