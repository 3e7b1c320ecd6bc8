// SPDX-License-Identifier: MIT OR Apache-2.0
//! Manager-side callback pipeline: sanitize, forward, and on terminal
//! states kick off the workspace export, release the container, and
//! wake the pull loop.

use crate::backend_client::BackendClient;
use crate::export::WorkspaceExportService;
use crate::pull::RunPullService;
use chrono::Utc;
use std::sync::Arc;
use swb_core::{
    AgentCallback, AgentState, CallbackReceipt, CallbackStatus, RequestContext, ScheduleMode,
    WorkspaceExportStatus,
};
use swb_error::{Error, ErrorKind, Result};
use swb_pool::ContainerPool;
use swb_workspace::IgnorePolicy;
use tracing::{debug, error, info};

/// Drop ignored/malformed paths from a state patch's file changes and
/// recompute the line totals from what survives.
pub fn sanitize_state_patch(patch: &mut AgentState, policy: &IgnorePolicy) {
    if let Some(workspace) = patch.workspace_state.as_mut() {
        workspace
            .file_changes
            .retain(|change| policy.allows_path(&change.path));
        workspace.recompute_totals();
    }
}

/// Receives executor callbacks and brokers them toward the Backend.
pub struct CallbackPipeline {
    backend: Arc<BackendClient>,
    pool: Arc<ContainerPool>,
    export: Arc<WorkspaceExportService>,
    pull: Arc<RunPullService>,
    policy: IgnorePolicy,
}

impl CallbackPipeline {
    /// Wire the pipeline over its collaborators.
    pub fn new(
        backend: Arc<BackendClient>,
        pool: Arc<ContainerPool>,
        export: Arc<WorkspaceExportService>,
        pull: Arc<RunPullService>,
        policy: IgnorePolicy,
    ) -> Self {
        Self {
            backend,
            pool,
            export,
            pull,
            policy,
        }
    }

    /// Process one executor callback. Forward failures surface as
    /// `CALLBACK_FORWARD_FAILED` so the executor can retry.
    pub async fn process_callback(
        &self,
        mut callback: AgentCallback,
        ctx: RequestContext,
    ) -> Result<CallbackReceipt> {
        let terminal = callback.status.is_terminal();
        if terminal {
            info!(
                session_id = %callback.session_id,
                status = %callback.status,
                progress = callback.progress,
                "callback received"
            );
        } else {
            debug!(
                session_id = %callback.session_id,
                status = %callback.status,
                progress = callback.progress,
                "callback received"
            );
        }

        if let Some(patch) = callback.state_patch.as_mut() {
            sanitize_state_patch(patch, &self.policy);
            debug!(
                session_id = %callback.session_id,
                todo_count = patch.todos.len(),
                mcp_count = patch.mcp_status.len(),
                file_change_count = patch
                    .workspace_state
                    .as_ref()
                    .map_or(0, |w| w.file_changes.len()),
                "callback state patch summary"
            );
        }

        let mut payload = serde_json::to_value(&callback)
            .map_err(|e| Error::new(ErrorKind::InvalidInput, e.to_string()))?;
        if terminal {
            payload["workspace_export_status"] = serde_json::json!(WorkspaceExportStatus::Pending);
        }

        if let Err(forward_error) = self.backend.forward_callback(&ctx, &payload).await {
            error!(
                session_id = %callback.session_id,
                status = %callback.status,
                %forward_error,
                "callback forward failed"
            );
            return Err(Error::new(
                ErrorKind::CallbackForwardFailed,
                "Failed to forward callback to backend",
            ));
        }

        if terminal {
            info!(
                session_id = %callback.session_id,
                status = %callback.status,
                "terminal callback received"
            );
            self.spawn_export_and_forward(&callback, &ctx);
            self.pool.on_task_complete(&callback.session_id).await;
            self.pull
                .trigger_poll(&[ScheduleMode::Immediate], Some("task_complete"));
        }

        Ok(CallbackReceipt {
            status: "received".to_string(),
            session_id: callback.session_id.clone(),
            callback_status: callback.status,
            progress: callback.progress,
        })
    }

    fn spawn_export_and_forward(&self, callback: &AgentCallback, ctx: &RequestContext) {
        let backend = self.backend.clone();
        let export = self.export.clone();
        let callback = callback.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            export_and_forward(&backend, &export, &callback, &ctx).await;
        });
    }
}

async fn export_and_forward(
    backend: &BackendClient,
    export: &WorkspaceExportService,
    callback: &AgentCallback,
    ctx: &RequestContext,
) {
    let result = match export.export_workspace(&callback.session_id).await {
        Ok(result) => Some(result),
        Err(error) => {
            error!(session_id = %callback.session_id, %error, "workspace export failed");
            None
        }
    };

    let progress = if callback.status == CallbackStatus::Completed {
        100
    } else {
        callback.progress
    };
    let followup = AgentCallback {
        session_id: callback.session_id.clone(),
        time: Utc::now(),
        status: callback.status,
        progress,
        new_message: None,
        state_patch: None,
        sdk_session_id: callback.sdk_session_id.clone(),
        workspace_files_prefix: result.as_ref().map(|r| r.workspace_files_prefix.clone()),
        workspace_manifest_key: result.as_ref().map(|r| r.workspace_manifest_key.clone()),
        workspace_archive_key: result.as_ref().and_then(|r| r.workspace_archive_key.clone()),
        workspace_export_status: Some(
            result
                .as_ref()
                .map_or(WorkspaceExportStatus::Failed, |r| r.workspace_export_status),
        ),
    };

    let payload = match serde_json::to_value(&followup) {
        Ok(payload) => payload,
        Err(error) => {
            error!(session_id = %callback.session_id, %error, "export callback not serializable");
            return;
        }
    };
    if let Err(error) = backend.forward_callback(ctx, &payload).await {
        error!(
            session_id = %callback.session_id,
            %error,
            "workspace export callback forward failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swb_core::{FileChange, WorkspaceState};

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
    fn filter_drops_ignored_and_malformed_paths() {
        let mut patch = AgentState {
            workspace_state: Some(WorkspaceState {
                repository: None,
                branch: None,
                total_added_lines: 0,
                total_deleted_lines: 0,
                file_changes: vec![
                    change("src/lib.rs", 10, 2),
                    change("node_modules/x/index.js", 400, 0),
                    change(".env", 1, 0),
                    change("../outside", 7, 7),
                    change("docs/guide.md", 3, 1),
                ],
                last_change: Utc::now(),
            }),
            ..AgentState::default()
        };
        sanitize_state_patch(&mut patch, &IgnorePolicy::default());

        let workspace = patch.workspace_state.unwrap();
        let paths: Vec<&str> = workspace
            .file_changes
            .iter()
            .map(|c| c.path.as_str())
            .collect();
        assert_eq!(paths, vec!["src/lib.rs", "docs/guide.md"]);
        assert_eq!(workspace.total_added_lines, 13);
        assert_eq!(workspace.total_deleted_lines, 3);
    }

    #[test]
    fn filter_handles_missing_workspace_state() {
        let mut patch = AgentState::default();
        sanitize_state_patch(&mut patch, &IgnorePolicy::default());
        assert!(patch.workspace_state.is_none());
    }
}
