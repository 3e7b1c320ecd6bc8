// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client for the executor's task API.

use serde_json::{Value, json};
use std::time::Duration;
use swb_core::RequestContext;
use swb_core::trace::{REQUEST_ID_HEADER, TRACE_ID_HEADER};
use swb_error::{Error, ErrorKind, Result};
use tracing::info;

/// Parameters for `POST /v1/tasks/execute`.
#[derive(Debug, Clone)]
pub struct ExecuteTask<'a> {
    /// Session to execute under.
    pub session_id: &'a str,
    /// Run being dispatched.
    pub run_id: &'a str,
    /// Agent prompt.
    pub prompt: &'a str,
    /// Callback URL for progress/state updates.
    pub callback_url: &'a str,
    /// Bearer token the executor presents on callbacks.
    pub callback_token: &'a str,
    /// Base URL for auxiliary callbacks (user-input proxy).
    pub callback_base_url: &'a str,
    /// Fully resolved task config.
    pub config: &'a Value,
    /// SDK session token to resume, if any.
    pub sdk_session_id: Option<&'a str>,
}

/// HTTP client for executors. Executors acknowledge with
/// `{"status": "accepted"}` and run asynchronously.
pub struct ExecutorClient {
    http: reqwest::Client,
}

impl Default for ExecutorClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorClient {
    /// Client with a 10s connect timeout and a 30s total timeout.
    #[must_use]
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// Dispatch a task to the executor at `executor_url`.
    pub async fn execute_task(
        &self,
        ctx: &RequestContext,
        executor_url: &str,
        task: &ExecuteTask<'_>,
    ) -> Result<Value> {
        let url = format!("{}/v1/tasks/execute", executor_url.trim_end_matches('/'));
        let payload = json!({
            "session_id": task.session_id,
            "run_id": task.run_id,
            "prompt": task.prompt,
            "callback_url": task.callback_url,
            "callback_token": task.callback_token,
            "callback_base_url": task.callback_base_url,
            "config": task.config,
            "sdk_session_id": task.sdk_session_id,
        });

        let response = self
            .http
            .post(&url)
            .header(REQUEST_ID_HEADER, &ctx.request_id)
            .header(TRACE_ID_HEADER, &ctx.trace_id)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                Error::new(ErrorKind::ExternalServiceError, format!("executor call failed: {e}"))
            })?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(Error::new(
                ErrorKind::ExternalServiceError,
                format!("executor rejected task ({status}): {body}"),
            ));
        }
        info!(session_id = task.session_id, run_id = task.run_id, "task accepted by executor");
        Ok(body)
    }
}
