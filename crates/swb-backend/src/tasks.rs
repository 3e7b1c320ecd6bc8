// SPDX-License-Identifier: MIT OR Apache-2.0
//! Task enqueueing, the best-effort pull trigger toward the Manager,
//! and the lease recovery sweep.

use crate::repo::Database;
use crate::sessions;
use crate::settings::BackendSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use swb_core::{NewRun, RequestContext, ScheduleMode, TaskConfig};
use swb_core::trace::{REQUEST_ID_HEADER, TRACE_ID_HEADER};
use swb_error::Result;
use tracing::{info, warn};
use uuid::Uuid;

/// `POST /api/v1/tasks` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskEnqueueRequest {
    /// Prompt for the agent.
    pub prompt: String,
    /// Existing session to continue, or none to start a new one.
    #[serde(default)]
    pub session_id: Option<Uuid>,
    /// Scheduling class.
    #[serde(default = "default_schedule_mode")]
    pub schedule_mode: ScheduleMode,
    /// Earliest eligible time for scheduled runs.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Config captured for new sessions.
    #[serde(default)]
    pub config: Option<TaskConfig>,
}

fn default_schedule_mode() -> ScheduleMode {
    ScheduleMode::Immediate
}

/// `POST /api/v1/tasks` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnqueueResponse {
    /// The queued run.
    pub run_id: Uuid,
    /// The (possibly new) session.
    pub session_id: Uuid,
}

/// Enqueue a run, creating a session when none was given. Session and
/// run are written together before the function returns.
pub fn enqueue_task(
    db: &Database,
    user_id: &str,
    request: &TaskEnqueueRequest,
) -> Result<TaskEnqueueResponse> {
    let session = match request.session_id {
        Some(session_id) => sessions::get_owned_session(db, session_id, user_id)?,
        None => {
            let mut config = request.config.clone().unwrap_or_default();
            config.user_id = user_id.to_string();
            sessions::create_session(db, user_id, config, Some(&request.prompt))
        }
    };

    let run = db.runs.enqueue(NewRun {
        session_id: session.session_id,
        prompt: request.prompt.clone(),
        schedule_mode: request.schedule_mode,
        scheduled_at: request.scheduled_at,
    });
    info!(
        run_id = %run.run_id,
        session_id = %session.session_id,
        mode = %request.schedule_mode,
        "task enqueued"
    );
    Ok(TaskEnqueueResponse {
        run_id: run.run_id,
        session_id: session.session_id,
    })
}

/// Best-effort trigger for the Manager to pull the run queue. Reduces
/// empty polling and claim latency for immediate runs; failures are
/// logged and swallowed.
pub async fn trigger_run_pull(
    http: &reqwest::Client,
    settings: &BackendSettings,
    ctx: &RequestContext,
    schedule_modes: &[ScheduleMode],
    reason: &str,
) -> bool {
    if settings.internal_api_token.is_empty() {
        warn!("pull trigger skipped: INTERNAL_API_TOKEN not configured");
        return false;
    }
    let base = settings.executor_manager_url.trim_end_matches('/');
    if base.is_empty() {
        warn!("pull trigger skipped: EXECUTOR_MANAGER_URL not configured");
        return false;
    }

    let url = format!("{base}/api/v1/internal/pull/trigger");
    let body = serde_json::json!({"schedule_modes": schedule_modes, "reason": reason});
    let response = http
        .post(&url)
        .timeout(Duration::from_secs(2))
        .header("X-Internal-Token", &settings.internal_api_token)
        .header(REQUEST_ID_HEADER, &ctx.request_id)
        .header(TRACE_ID_HEADER, &ctx.trace_id)
        .json(&body)
        .send()
        .await;

    match response {
        Ok(response) if response.status().is_success() => {
            let accepted = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v["data"]["accepted"].as_bool())
                .unwrap_or(false);
            accepted
        }
        Ok(response) => {
            warn!(status = %response.status(), reason, "pull trigger rejected");
            false
        }
        Err(error) => {
            warn!(%error, reason, "pull trigger unavailable");
            false
        }
    }
}

/// Count queued scheduled runs that have become due. The Manager's
/// scheduled-task feeder calls this and triggers a `scheduled` pull
/// when the count is positive.
#[must_use]
pub fn count_due_scheduled(db: &Database, limit: usize) -> usize {
    let now = Utc::now();
    db.runs
        .snapshot()
        .into_iter()
        .filter(|run| {
            run.status == swb_core::RunStatus::Queued
                && run.schedule_mode == ScheduleMode::Scheduled
                && run.scheduled_at.is_some_and(|at| at <= now)
        })
        .take(limit)
        .count()
}

/// Periodically requeue runs whose lease expired. Runs until aborted.
pub fn spawn_recovery_sweep(db: Arc<Database>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let requeued = db.runs.sweep_expired();
            if !requeued.is_empty() {
                info!(count = requeued.len(), "recovery sweep requeued runs");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn immediate_request(prompt: &str) -> TaskEnqueueRequest {
        TaskEnqueueRequest {
            prompt: prompt.into(),
            session_id: None,
            schedule_mode: ScheduleMode::Immediate,
            scheduled_at: None,
            config: None,
        }
    }

    #[test]
    fn enqueue_creates_session_when_absent() {
        let db = Database::new();
        let response = enqueue_task(&db, "u1", &immediate_request("hello")).unwrap();
        let session = db.session(response.session_id).unwrap();
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.title.as_deref(), Some("hello"));
        assert!(db.runs.get(response.run_id).is_some());
    }

    #[test]
    fn enqueue_rejects_foreign_session() {
        let db = Database::new();
        let first = enqueue_task(&db, "u1", &immediate_request("a")).unwrap();
        let mut request = immediate_request("b");
        request.session_id = Some(first.session_id);
        let err = enqueue_task(&db, "u2", &request).unwrap_err();
        assert_eq!(err.kind, swb_error::ErrorKind::Forbidden);
    }

    #[test]
    fn due_scheduled_counting() {
        let db = Database::new();
        let mut request = immediate_request("later");
        request.schedule_mode = ScheduleMode::Scheduled;
        request.scheduled_at = Some(Utc::now() - chrono::Duration::seconds(5));
        enqueue_task(&db, "u1", &request).unwrap();

        let mut future = immediate_request("much later");
        future.schedule_mode = ScheduleMode::Scheduled;
        future.scheduled_at = Some(Utc::now() + chrono::Duration::hours(1));
        enqueue_task(&db, "u1", &future).unwrap();

        assert_eq!(count_due_scheduled(&db, 10), 1);
    }
}
