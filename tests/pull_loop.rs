// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pull-loop behavior against a mocked Backend: trigger debouncing and
//! the global concurrency cap.

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use swb_core::ScheduleMode;
use swb_manager::{ManagerSettings, ManagerState};
use swb_pool::StaticProvisioner;
use swb_store::MemoryStore;
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn envelope(data: Value) -> Value {
    json!({"success": true, "code": "OK", "message": "", "data": data})
}

async fn mock_dispatch_collaborators(backend: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v1/mcp-presets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]))))
        .mount(backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/skill-presets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]))))
        .mount(backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/internal/env-vars/map"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .mount(backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/internal/slash-commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .mount(backend)
        .await;
    Mock::given(method("PATCH"))
        .and(path_regex(r"^/api/v1/sessions/[^/]+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .mount(backend)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/api/v1/runs/[^/]+/start$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .mount(backend)
        .await;
}

fn manager_state(
    backend_url: &str,
    executor_url: &str,
    workspace_root: &std::path::Path,
    max_concurrent: usize,
) -> ManagerState {
    let settings = ManagerSettings {
        backend_url: backend_url.to_string(),
        executor_url: executor_url.to_string(),
        callback_base_url: "http://localhost:0".to_string(),
        workspace_root: workspace_root.to_path_buf(),
        max_concurrent_tasks: max_concurrent,
        trigger_debounce_ms: 50,
        scheduled_tasks_enabled: false,
        export_archive_enabled: false,
        ..ManagerSettings::default()
    };
    ManagerState::new(
        settings,
        Arc::new(MemoryStore::new()),
        Arc::new(StaticProvisioner::new(executor_url)),
    )
}

async fn claim_requests(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == "/api/v1/runs/claim")
        .map(|r| serde_json::from_slice(&r.body).unwrap_or(Value::Null))
        .collect()
}

// ---------------------------------------------------------------------------
// P6: N near-simultaneous triggers → one poll with the mode union.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn triggers_debounce_and_merge_modes() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/runs/claim"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(Value::Null)))
        .mount(&backend)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let state = manager_state(&backend.uri(), "http://localhost:0", tmp.path(), 2);

    let first = state
        .pull
        .trigger_poll(&[ScheduleMode::Immediate], Some("test-1"));
    let second = state
        .pull
        .trigger_poll(&[ScheduleMode::Scheduled], Some("test-2"));
    let third = state
        .pull
        .trigger_poll(&[ScheduleMode::Scheduled], Some("test-3"));
    assert!(first, "first trigger arms the timer");
    assert!(second, "new mode widens the pending set");
    assert!(!third, "repeat mode is debounced");

    tokio::time::sleep(Duration::from_millis(400)).await;

    let claims = claim_requests(&backend).await;
    assert_eq!(claims.len(), 1, "one poll per debounce window");
    let modes: Vec<&str> = claims[0]["schedule_modes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(modes.contains(&"immediate"));
    assert!(modes.contains(&"scheduled"));
}

// ---------------------------------------------------------------------------
// P10: in-flight dispatches never exceed MAX_CONCURRENT_TASKS.
// ---------------------------------------------------------------------------

struct ClaimResponder;

impl Respond for ClaimResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let run_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let now = chrono::Utc::now();
        ResponseTemplate::new(200).set_body_json(envelope(json!({
            "run": {
                "run_id": run_id,
                "session_id": session_id,
                "prompt": "hi",
                "schedule_mode": "immediate",
                "scheduled_at": null,
                "status": "claimed",
                "worker_id": "test-worker",
                "lease_expires_at": now + chrono::Duration::seconds(30),
                "progress": 0,
                "started_at": null,
                "finished_at": null,
                "error_message": null,
                "created_at": now,
            },
            "user_id": "u1",
            "prompt": "hi",
            "config_snapshot": {"user_id": "u1"},
            "sdk_session_id": null,
        })))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrency_cap_limits_in_flight_dispatches() {
    let backend = MockServer::start().await;
    mock_dispatch_collaborators(&backend).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/runs/claim"))
        .respond_with(ClaimResponder)
        .mount(&backend)
        .await;

    let executor = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/tasks/execute"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(600))
                .set_body_json(json!({"status": "accepted"})),
        )
        .mount(&executor)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let state = manager_state(&backend.uri(), &executor.uri(), tmp.path(), 2);

    state.pull.poll(Some(vec![ScheduleMode::Immediate])).await;

    // Both permits are held by in-flight dispatches; the poll stopped
    // claiming at the cap.
    assert_eq!(state.pull.in_flight(), 2);
    assert_eq!(claim_requests(&backend).await.len(), 2);

    // A poll without capacity claims nothing.
    state.pull.poll(Some(vec![ScheduleMode::Immediate])).await;
    assert_eq!(claim_requests(&backend).await.len(), 2);

    // Once the executor responds, permits are released.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(state.pull.in_flight(), 0);

    let executed = executor.received_requests().await.unwrap_or_default();
    assert_eq!(executed.len(), 2);

    state.pull.shutdown().await;
}

// ---------------------------------------------------------------------------
// Schedule windows gate polling for their modes.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn window_polls_only_while_open() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/runs/claim"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(Value::Null)))
        .mount(&backend)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let state = manager_state(&backend.uri(), "http://localhost:0", tmp.path(), 2);

    // Closed window: no claim.
    state
        .pull
        .poll_window("morning", Some(vec![ScheduleMode::Scheduled]))
        .await;
    assert_eq!(claim_requests(&backend).await.len(), 0);

    // Opening polls immediately, and companion polls pass while open.
    state
        .pull
        .open_window("morning", Some(vec![ScheduleMode::Scheduled]), 60)
        .await;
    state
        .pull
        .poll_window("morning", Some(vec![ScheduleMode::Scheduled]))
        .await;
    assert_eq!(claim_requests(&backend).await.len(), 2);

    // Force the window shut; the companion poll becomes a no-op.
    state
        .pull
        .set_window_until("morning", chrono::Utc::now() - chrono::Duration::seconds(1));
    state
        .pull
        .poll_window("morning", Some(vec![ScheduleMode::Scheduled]))
        .await;
    assert_eq!(claim_requests(&backend).await.len(), 2);
}
