// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed client for the Backend service.

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use swb_core::trace::{REQUEST_ID_HEADER, TRACE_ID_HEADER};
use swb_core::{
    ClaimedRun, McpPreset, RequestContext, ScheduleMode, SessionStatus, SkillPreset,
    UserInputRequest,
};
use swb_error::{Error, ErrorKind, Result};
use tracing::warn;
use uuid::Uuid;

/// Claim attempts before a poll gives up.
pub const MAX_CLAIM_ATTEMPTS: u32 = 5;

/// HTTP client for Backend endpoints the Manager consumes.
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    internal_token: String,
}

impl BackendClient {
    /// Client for the Backend at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, internal_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            internal_token: internal_token.into(),
        }
    }

    fn request(
        &self,
        builder: reqwest::RequestBuilder,
        ctx: &RequestContext,
    ) -> reqwest::RequestBuilder {
        builder
            .header(REQUEST_ID_HEADER, &ctx.request_id)
            .header(TRACE_ID_HEADER, &ctx.trace_id)
    }

    async fn expect_data(response: reqwest::Response, what: &str) -> Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            Error::new(
                ErrorKind::BackendUnavailable,
                format!("{what}: invalid response body: {e}"),
            )
        })?;
        if !status.is_success() {
            let code = body["code"].as_str().unwrap_or("");
            let kind = if code == "LEASE_LOST" {
                ErrorKind::LeaseLost
            } else {
                ErrorKind::BackendUnavailable
            };
            return Err(Error::new(
                kind,
                format!(
                    "{what} failed ({status}): {}",
                    body["message"].as_str().unwrap_or("")
                ),
            ));
        }
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    /// `POST /api/v1/sessions`.
    pub async fn create_session(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        config: &Value,
    ) -> Result<Value> {
        let response = self
            .request(self.http.post(format!("{}/api/v1/sessions", self.base_url)), ctx)
            .json(&json!({"user_id": user_id, "config": config}))
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::SessionCreateFailed, e.to_string()))?;
        Self::expect_data(response, "create session").await
    }

    /// `PATCH /api/v1/sessions/{id}` setting only the status. The
    /// owning `user_id` travels as the identity header so the Backend's
    /// ownership check passes.
    pub async fn update_session_status(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        user_id: &str,
        status: SessionStatus,
    ) -> Result<()> {
        let response = self
            .request(
                self.http
                    .patch(format!("{}/api/v1/sessions/{session_id}", self.base_url)),
                ctx,
            )
            .header("X-User-Id", user_id)
            .json(&json!({"status": status}))
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))?;
        Self::expect_data(response, "update session status").await?;
        Ok(())
    }

    /// `POST /api/v1/callback`.
    pub async fn forward_callback(&self, ctx: &RequestContext, payload: &Value) -> Result<()> {
        let response = self
            .request(self.http.post(format!("{}/api/v1/callback", self.base_url)), ctx)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::CallbackForwardFailed, e.to_string()))?;
        Self::expect_data(response, "forward callback").await?;
        Ok(())
    }

    /// `POST /api/v1/runs/claim`, one attempt.
    pub async fn claim_run(
        &self,
        ctx: &RequestContext,
        worker_id: &str,
        lease_seconds: i64,
        schedule_modes: Option<&[ScheduleMode]>,
    ) -> Result<Option<ClaimedRun>> {
        let mut payload = json!({"worker_id": worker_id, "lease_seconds": lease_seconds});
        if let Some(modes) = schedule_modes {
            payload["schedule_modes"] = json!(modes);
        }
        let response = self
            .request(self.http.post(format!("{}/api/v1/runs/claim", self.base_url)), ctx)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))?;
        let data = Self::expect_data(response, "claim run").await?;
        if data.is_null() {
            return Ok(None);
        }
        serde_json::from_value(data)
            .map(Some)
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, format!("claim payload: {e}")))
    }

    /// Claim with exponential backoff across transient Backend errors.
    pub async fn claim_run_with_backoff(
        &self,
        ctx: &RequestContext,
        worker_id: &str,
        lease_seconds: i64,
        schedule_modes: Option<&[ScheduleMode]>,
    ) -> Result<Option<ClaimedRun>> {
        let mut delay = Duration::from_millis(100);
        let mut last_error = None;
        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            match self
                .claim_run(ctx, worker_id, lease_seconds, schedule_modes)
                .await
            {
                Ok(result) => return Ok(result),
                Err(error) => {
                    warn!(attempt, %error, "claim attempt failed");
                    last_error = Some(error);
                    if attempt < MAX_CLAIM_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| Error::new(ErrorKind::BackendUnavailable, "claim failed")))
    }

    /// `POST /api/v1/runs/{id}/start`.
    pub async fn start_run(
        &self,
        ctx: &RequestContext,
        run_id: Uuid,
        worker_id: &str,
    ) -> Result<Value> {
        let response = self
            .request(
                self.http
                    .post(format!("{}/api/v1/runs/{run_id}/start", self.base_url)),
                ctx,
            )
            .json(&json!({"worker_id": worker_id}))
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))?;
        Self::expect_data(response, "start run").await
    }

    /// `POST /api/v1/runs/{id}/fail`.
    pub async fn fail_run(
        &self,
        ctx: &RequestContext,
        run_id: Uuid,
        worker_id: &str,
        error_message: Option<&str>,
    ) -> Result<Value> {
        let response = self
            .request(
                self.http
                    .post(format!("{}/api/v1/runs/{run_id}/fail", self.base_url)),
                ctx,
            )
            .json(&json!({"worker_id": worker_id, "error_message": error_message}))
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))?;
        Self::expect_data(response, "fail run").await
    }

    /// `POST /api/v1/runs/cancel` for a session's active run.
    pub async fn cancel_session_run(&self, ctx: &RequestContext, session_id: &str) -> Result<()> {
        let response = self
            .request(self.http.post(format!("{}/api/v1/runs/cancel", self.base_url)), ctx)
            .json(&json!({"session_id": session_id}))
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))?;
        Self::expect_data(response, "cancel session run").await?;
        Ok(())
    }

    /// `GET /api/v1/internal/env-vars/map` for `user_id`.
    pub async fn get_env_map(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> Result<BTreeMap<String, String>> {
        let response = self
            .request(
                self.http
                    .get(format!("{}/api/v1/internal/env-vars/map", self.base_url)),
                ctx,
            )
            .header("X-Internal-Token", &self.internal_token)
            .header("X-User-Id", user_id)
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))?;
        let data = Self::expect_data(response, "env map").await?;
        Ok(serde_json::from_value(data).unwrap_or_default())
    }

    /// `GET /api/v1/mcp-presets`.
    pub async fn list_mcp_presets(
        &self,
        ctx: &RequestContext,
        include_inactive: bool,
    ) -> Result<Vec<McpPreset>> {
        let response = self
            .request(self.http.get(format!("{}/api/v1/mcp-presets", self.base_url)), ctx)
            .query(&[("include_inactive", include_inactive)])
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))?;
        let data = Self::expect_data(response, "mcp presets").await?;
        Ok(serde_json::from_value(data).unwrap_or_default())
    }

    /// `GET /api/v1/skill-presets`.
    pub async fn list_skill_presets(
        &self,
        ctx: &RequestContext,
        include_inactive: bool,
    ) -> Result<Vec<SkillPreset>> {
        let response = self
            .request(
                self.http.get(format!("{}/api/v1/skill-presets", self.base_url)),
                ctx,
            )
            .query(&[("include_inactive", include_inactive)])
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))?;
        let data = Self::expect_data(response, "skill presets").await?;
        Ok(serde_json::from_value(data).unwrap_or_default())
    }

    /// `GET /api/v1/internal/slash-commands` for `user_id`.
    pub async fn resolve_slash_commands(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> Result<BTreeMap<String, String>> {
        let response = self
            .request(
                self.http
                    .get(format!("{}/api/v1/internal/slash-commands", self.base_url)),
                ctx,
            )
            .header("X-Internal-Token", &self.internal_token)
            .header("X-User-Id", user_id)
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))?;
        let data = Self::expect_data(response, "slash commands").await?;
        Ok(serde_json::from_value(data).unwrap_or_default())
    }

    /// `POST /api/v1/internal/user-input-requests`.
    pub async fn create_user_input_request(
        &self,
        ctx: &RequestContext,
        payload: &Value,
    ) -> Result<UserInputRequest> {
        let response = self
            .request(
                self.http
                    .post(format!("{}/api/v1/internal/user-input-requests", self.base_url)),
                ctx,
            )
            .header("X-Internal-Token", &self.internal_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))?;
        let data = Self::expect_data(response, "create user input request").await?;
        serde_json::from_value(data)
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))
    }

    /// `GET /api/v1/internal/user-input-requests/{id}`.
    pub async fn get_user_input_request(
        &self,
        ctx: &RequestContext,
        request_id: &str,
    ) -> Result<UserInputRequest> {
        let response = self
            .request(
                self.http.get(format!(
                    "{}/api/v1/internal/user-input-requests/{request_id}",
                    self.base_url
                )),
                ctx,
            )
            .header("X-Internal-Token", &self.internal_token)
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))?;
        let data = Self::expect_data(response, "get user input request").await?;
        serde_json::from_value(data)
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))
    }

    /// `POST /api/v1/internal/scheduled-tasks/dispatch-due`.
    pub async fn dispatch_due_scheduled_tasks(
        &self,
        ctx: &RequestContext,
        limit: usize,
    ) -> Result<Value> {
        let response = self
            .request(
                self.http.post(format!(
                    "{}/api/v1/internal/scheduled-tasks/dispatch-due",
                    self.base_url
                )),
                ctx,
            )
            .header("X-Internal-Token", &self.internal_token)
            .json(&json!({"limit": limit}))
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::BackendUnavailable, e.to_string()))?;
        Self::expect_data(response, "dispatch due scheduled tasks").await
    }
}
