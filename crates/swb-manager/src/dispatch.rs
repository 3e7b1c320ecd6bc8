// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dispatch: resolve → stage → acquire container → mark running → call
//! executor. Each step emits a `timing` record; any failure marks the
//! run failed and releases the container binding.

use crate::backend_client::BackendClient;
use crate::executor_client::{ExecuteTask, ExecutorClient};
use crate::resolver::ConfigResolver;
use crate::settings::ManagerSettings;
use crate::staging::{self, WorkspaceLayout};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use swb_core::{ClaimedRun, RequestContext, SessionStatus};
use swb_error::{ErrorKind, Result};
use swb_pool::ContainerPool;
use swb_store::BlobStore;
use tracing::{error, info};

/// Everything a dispatch needs, wired once at startup.
#[derive(Clone)]
pub struct DispatchDeps {
    /// Backend client.
    pub backend: Arc<BackendClient>,
    /// Executor client.
    pub executor: Arc<ExecutorClient>,
    /// Container pool.
    pub pool: Arc<ContainerPool>,
    /// Config resolver.
    pub resolver: Arc<ConfigResolver>,
    /// Local workspace layout.
    pub layout: WorkspaceLayout,
    /// Blob store for staging downloads.
    pub store: Arc<dyn BlobStore>,
    /// Manager settings.
    pub settings: Arc<ManagerSettings>,
}

macro_rules! timed {
    ($step:literal, $task_id:expr, $session_id:expr, $body:expr) => {{
        let step_started = Instant::now();
        let result = $body;
        info!(
            step = $step,
            duration_ms = step_started.elapsed().as_millis() as u64,
            task_id = %$task_id,
            session_id = %$session_id,
            "timing"
        );
        result
    }};
}

async fn run_dispatch(
    deps: &DispatchDeps,
    claim: &ClaimedRun,
    ctx: &RequestContext,
) -> Result<()> {
    let run_id = claim.run.run_id;
    let session_id = claim.run.session_id.to_string();
    let user_id = claim.user_id.as_str();
    let config = &claim.config_snapshot;
    let dispatch_started = Instant::now();

    info!(
        task_id = %run_id,
        session_id = %session_id,
        container_mode = %config.container_mode,
        request_id = %ctx.request_id,
        trace_id = %ctx.trace_id,
        "dispatching run"
    );

    let mut resolved = timed!("task_dispatch_resolve_config", run_id, session_id, {
        deps.resolver.resolve(ctx, user_id, config).await?
    });

    let skills = resolved["skill_files"]
        .as_object()
        .cloned()
        .unwrap_or_else(Map::new);
    let staged_skills = timed!("task_dispatch_stage_skills", run_id, session_id, {
        staging::stage_skills(deps.store.as_ref(), &deps.layout, user_id, &session_id, &skills)
            .await?
    });
    resolved["skill_files"] = Value::Object(staged_skills);

    let inputs = resolved["input_files"].as_array().cloned().unwrap_or_default();
    let staged_inputs = timed!("task_dispatch_stage_inputs", run_id, session_id, {
        staging::stage_attachments(
            deps.store.as_ref(),
            &deps.layout,
            user_id,
            &session_id,
            &inputs,
        )
        .await?
    });
    resolved["input_files"] = Value::Array(staged_inputs);

    timed!("task_dispatch_stage_slash_commands", run_id, session_id, {
        let commands = deps.backend.resolve_slash_commands(ctx, user_id).await?;
        staging::stage_slash_commands(&deps.layout, user_id, &session_id, &commands)?;
    });

    let (executor_url, container_id) =
        timed!("task_dispatch_get_or_create_container", run_id, session_id, {
            deps.pool
                .get_or_create_container(
                    &session_id,
                    user_id,
                    config.container_mode,
                    config.container_id.as_deref(),
                )
                .await?
        });

    timed!(
        "task_dispatch_backend_update_status_running",
        run_id,
        session_id,
        {
            deps.backend
                .update_session_status(ctx, &session_id, user_id, SessionStatus::Running)
                .await?;
        }
    );

    let callback_url = format!(
        "{}/api/v1/callback",
        deps.settings.callback_base_url.trim_end_matches('/')
    );
    timed!("task_dispatch_executor_execute_task", run_id, session_id, {
        deps.executor
            .execute_task(
                ctx,
                &executor_url,
                &ExecuteTask {
                    session_id: &session_id,
                    run_id: &run_id.to_string(),
                    prompt: &claim.prompt,
                    callback_url: &callback_url,
                    callback_token: &deps.settings.callback_token,
                    callback_base_url: &deps.settings.callback_base_url,
                    config: &resolved,
                    sdk_session_id: claim.sdk_session_id.as_deref(),
                },
            )
            .await?;
    });

    info!(
        step = "task_dispatch_total",
        duration_ms = dispatch_started.elapsed().as_millis() as u64,
        task_id = %run_id,
        session_id = %session_id,
        container_id = %container_id,
        container_mode = %config.container_mode,
        "timing"
    );
    Ok(())
}

/// Dispatch a claimed run. Never panics; every failure path marks the
/// run failed (when the lease still permits it) and releases the
/// container binding.
pub async fn dispatch(
    deps: &DispatchDeps,
    worker_id: &str,
    claim: ClaimedRun,
    ctx: RequestContext,
) {
    let run_id = claim.run.run_id;
    let session_id = claim.run.session_id.to_string();

    match run_dispatch(deps, &claim, &ctx).await {
        Ok(()) => {
            // The executor accepted; mark the run running under our lease.
            match deps.backend.start_run(&ctx, run_id, worker_id).await {
                Ok(_) => {
                    info!(task_id = %run_id, session_id = %session_id, "run dispatched");
                }
                Err(error) if error.kind == ErrorKind::LeaseLost => {
                    // The sweep requeued this run; another worker owns it
                    // now. Abandon without failing it.
                    error!(task_id = %run_id, %error, "lease lost after dispatch, abandoning run");
                }
                Err(error) => {
                    error!(task_id = %run_id, %error, "failed to mark run running");
                }
            }
        }
        Err(error) => {
            error!(
                task_id = %run_id,
                session_id = %session_id,
                code = error.kind.code(),
                %error,
                "failed to dispatch run"
            );
            if error.kind != ErrorKind::LeaseLost {
                if let Err(fail_error) = deps
                    .backend
                    .fail_run(&ctx, run_id, worker_id, Some(&error.to_string()))
                    .await
                {
                    error!(task_id = %run_id, %fail_error, "failed to mark run failed");
                }
            }
            if let Err(cancel_error) = deps.pool.cancel_task(&session_id).await {
                error!(session_id = %session_id, %cancel_error, "failed to release container");
            }
        }
    }
}
