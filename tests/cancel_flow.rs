// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scenario: cancel while running. The run becomes `canceled`, the
//! session `failed`, and the ephemeral container is released.

use serde_json::{Value, json};
use std::sync::Arc;
use swb_backend::{AppState, BackendSettings, Database, build_app as build_backend};
use swb_core::{ContainerMode, RunStatus, SessionStatus};
use swb_manager::{ManagerSettings, ManagerState, build_app as build_manager};
use swb_pool::StaticProvisioner;
use swb_store::MemoryStore;

#[tokio::test(flavor = "multi_thread")]
async fn cancel_running_session() {
    let db = Arc::new(Database::new());
    let backend_state = AppState::new(
        db.clone(),
        Arc::new(MemoryStore::new()),
        BackendSettings::default(),
    );
    let backend_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(backend_listener, build_backend(backend_state))
            .await
            .unwrap();
    });

    let workspace_root = tempfile::tempdir().unwrap();
    let settings = ManagerSettings {
        backend_url: format!("http://{backend_addr}"),
        workspace_root: workspace_root.path().to_path_buf(),
        scheduled_tasks_enabled: false,
        ..ManagerSettings::default()
    };
    let manager_state = ManagerState::new(
        settings,
        Arc::new(MemoryStore::new()),
        Arc::new(StaticProvisioner::new("http://localhost:0")),
    );
    let manager_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let manager_addr = manager_listener.local_addr().unwrap();
    {
        let app = build_manager(manager_state.clone());
        tokio::spawn(async move {
            axum::serve(manager_listener, app).await.unwrap();
        });
    }

    let http = reqwest::Client::new();
    let backend_base = format!("http://{backend_addr}");

    // A run is claimed and running, with an ephemeral container bound.
    let enqueued: Value = http
        .post(format!("{backend_base}/api/v1/tasks"))
        .header("x-user-id", "u1")
        .json(&json!({"prompt": "long task", "schedule_mode": "immediate", "config": {"user_id": "u1"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = enqueued["data"]["session_id"].as_str().unwrap().to_string();
    let session_uuid = uuid::Uuid::parse_str(&session_id).unwrap();

    let claimed: Value = http
        .post(format!("{backend_base}/api/v1/runs/claim"))
        .json(&json!({"worker_id": "w1", "lease_seconds": 30}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let run_id = claimed["data"]["run"]["run_id"].as_str().unwrap().to_string();
    http.post(format!("{backend_base}/api/v1/runs/{run_id}/start"))
        .json(&json!({"worker_id": "w1"}))
        .send()
        .await
        .unwrap();

    manager_state
        .pool
        .get_or_create_container(&session_id, "u1", ContainerMode::Ephemeral, None)
        .await
        .unwrap();
    assert_eq!(manager_state.pool.stats().await.total_active, 1);

    // Cancel through the Manager.
    let canceled: Value = http
        .post(format!("http://{manager_addr}/api/v1/executor/cancel"))
        .json(&json!({"session_id": session_id}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(canceled["data"]["status"], "canceled");

    // The ephemeral container is gone from the pool.
    let stats = manager_state.pool.stats().await;
    assert_eq!(stats.total_active, 0);
    assert_eq!(stats.ephemeral_count, 0);

    // Run terminal `canceled`, session `failed`.
    let run = db
        .runs
        .get(uuid::Uuid::parse_str(&run_id).unwrap())
        .unwrap();
    assert_eq!(run.status, RunStatus::Canceled);
    assert_eq!(db.session(session_uuid).unwrap().status, SessionStatus::Failed);

    // A later cancel of the same session is a no-op on the run side.
    let again = http
        .post(format!("http://{manager_addr}/api/v1/executor/cancel"))
        .json(&json!({"session_id": session_id}))
        .send()
        .await
        .unwrap();
    assert!(again.status().is_success());
    assert_eq!(
        db.runs
            .get(uuid::Uuid::parse_str(&run_id).unwrap())
            .unwrap()
            .status,
        RunStatus::Canceled
    );
}
