// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-session execution container pool.
//!
//! The pool binds sessions to executor endpoints and owns their
//! lifecycle: ephemeral containers live strictly for one run, persistent
//! containers survive until an explicit delete. Provisioning is
//! abstracted behind [`ContainerProvisioner`]; Docker, K8s, and plain
//! VMs are all valid implementations.
#![deny(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use swb_core::ContainerMode;
use swb_error::Result;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Provisioner seam
// ---------------------------------------------------------------------------

/// Request to provision a container.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Session the container will serve.
    pub session_id: String,
    /// Owning user.
    pub user_id: String,
    /// Requested lifecycle.
    pub mode: ContainerMode,
}

/// A provisioned container endpoint.
#[derive(Debug, Clone)]
pub struct ProvisionedContainer {
    /// Container identifier.
    pub container_id: String,
    /// Base URL of the executor inside the container.
    pub executor_url: String,
}

/// How containers come into and go out of existence.
#[async_trait]
pub trait ContainerProvisioner: Send + Sync {
    /// Create a container and return its endpoint.
    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionedContainer>;

    /// Destroy a container.
    async fn terminate(&self, container_id: &str) -> Result<()>;

    /// Stop the task currently running in a container, leaving the
    /// container itself alive.
    async fn cancel(&self, container_id: &str, session_id: &str) -> Result<()>;
}

/// Provisioner that hands out URLs derived from a fixed executor base.
/// Suits single-executor deployments and tests.
pub struct StaticProvisioner {
    base_url: String,
}

impl StaticProvisioner {
    /// All containers resolve to `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ContainerProvisioner for StaticProvisioner {
    async fn provision(&self, _request: &ProvisionRequest) -> Result<ProvisionedContainer> {
        Ok(ProvisionedContainer {
            container_id: format!("ctr-{}", Uuid::new_v4().simple()),
            executor_url: self.base_url.clone(),
        })
    }

    async fn terminate(&self, _container_id: &str) -> Result<()> {
        Ok(())
    }

    async fn cancel(&self, _container_id: &str, _session_id: &str) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pool state
// ---------------------------------------------------------------------------

/// Pool-visible container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Bound to a session with a task in flight.
    Busy,
    /// Alive with no bound session.
    Idle,
}

/// One tracked container.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    /// Container identifier.
    pub container_id: String,
    /// Executor endpoint.
    pub executor_url: String,
    /// Lifecycle mode.
    pub mode: ContainerMode,
    /// Owning user.
    pub user_id: String,
    /// Currently bound session, if any.
    pub session_id: Option<String>,
    /// Busy/idle state.
    pub state: ContainerState,
    /// Provision time.
    pub created_at: DateTime<Utc>,
}

/// Aggregate pool statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerStats {
    /// Containers currently tracked.
    pub total_active: usize,
    /// Persistent containers.
    pub persistent_count: usize,
    /// Ephemeral containers.
    pub ephemeral_count: usize,
    /// Per-container detail.
    pub containers: Vec<ContainerInfo>,
}

#[derive(Default)]
struct PoolState {
    // session_id -> container_id; at most one binding per session.
    by_session: HashMap<String, String>,
    containers: HashMap<String, ContainerInfo>,
    // Containers whose delete failed, retried by the sweep.
    pending_deletes: Vec<String>,
}

/// The container pool. One global mutex protects the binding map;
/// provisioner calls are issued outside it.
pub struct ContainerPool {
    provisioner: Arc<dyn ContainerProvisioner>,
    state: Mutex<PoolState>,
}

impl ContainerPool {
    /// Create a pool over `provisioner`.
    pub fn new(provisioner: Arc<dyn ContainerProvisioner>) -> Self {
        Self {
            provisioner,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Resolve or create the container serving `session_id`.
    ///
    /// Persistent with a known id returns the existing container;
    /// persistent without one provisions and registers; ephemeral always
    /// provisions fresh and binds to the session.
    pub async fn get_or_create_container(
        &self,
        session_id: &str,
        user_id: &str,
        mode: ContainerMode,
        container_id: Option<&str>,
    ) -> Result<(String, String)> {
        {
            let state = self.state.lock().await;
            if let Some(existing_id) = state.by_session.get(session_id) {
                if let Some(info) = state.containers.get(existing_id) {
                    return Ok((info.executor_url.clone(), info.container_id.clone()));
                }
            }
            if mode == ContainerMode::Persistent {
                if let Some(id) = container_id {
                    if let Some(info) = state.containers.get(id) {
                        let url = info.executor_url.clone();
                        drop(state);
                        self.bind(session_id, id).await;
                        return Ok((url, id.to_string()));
                    }
                }
            }
        }

        let provisioned = self
            .provisioner
            .provision(&ProvisionRequest {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                mode,
            })
            .await?;

        let info = ContainerInfo {
            container_id: provisioned.container_id.clone(),
            executor_url: provisioned.executor_url.clone(),
            mode,
            user_id: user_id.to_string(),
            session_id: Some(session_id.to_string()),
            state: ContainerState::Busy,
            created_at: Utc::now(),
        };

        let mut state = self.state.lock().await;
        state
            .containers
            .insert(provisioned.container_id.clone(), info);
        state
            .by_session
            .insert(session_id.to_string(), provisioned.container_id.clone());
        info!(
            session_id,
            container_id = %provisioned.container_id,
            mode = %mode,
            "container bound"
        );
        Ok((provisioned.executor_url, provisioned.container_id))
    }

    async fn bind(&self, session_id: &str, container_id: &str) {
        let mut state = self.state.lock().await;
        state
            .by_session
            .insert(session_id.to_string(), container_id.to_string());
        if let Some(info) = state.containers.get_mut(container_id) {
            info.session_id = Some(session_id.to_string());
            info.state = ContainerState::Busy;
        }
    }

    fn unbind(state: &mut PoolState, session_id: &str) -> Option<ContainerInfo> {
        let container_id = state.by_session.remove(session_id)?;
        if let Some(info) = state.containers.get_mut(&container_id) {
            info.session_id = None;
            info.state = ContainerState::Idle;
        }
        state.containers.get(&container_id).cloned()
    }

    /// Terminate the task running for `session_id`; ephemeral containers
    /// are deleted outright.
    pub async fn cancel_task(&self, session_id: &str) -> Result<()> {
        let info = {
            let mut state = self.state.lock().await;
            Self::unbind(&mut state, session_id)
        };
        let Some(info) = info else {
            return Ok(());
        };

        if let Err(error) = self
            .provisioner
            .cancel(&info.container_id, session_id)
            .await
        {
            warn!(session_id, container_id = %info.container_id, %error, "task cancel failed");
        }
        if info.mode == ContainerMode::Ephemeral {
            self.remove_container(&info.container_id).await;
        }
        Ok(())
    }

    /// Release the container after a run finished: ephemeral containers
    /// are deleted, persistent ones go idle.
    pub async fn on_task_complete(&self, session_id: &str) {
        let info = {
            let mut state = self.state.lock().await;
            Self::unbind(&mut state, session_id)
        };
        let Some(info) = info else { return };
        if info.mode == ContainerMode::Ephemeral {
            self.remove_container(&info.container_id).await;
        }
    }

    /// Force-delete a container regardless of mode or binding.
    pub async fn delete_container(&self, container_id: &str) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            let bound: Vec<String> = state
                .by_session
                .iter()
                .filter(|(_, c)| c.as_str() == container_id)
                .map(|(s, _)| s.clone())
                .collect();
            for session in bound {
                state.by_session.remove(&session);
            }
        }
        self.remove_container(container_id).await;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) {
        {
            let mut state = self.state.lock().await;
            state.containers.remove(container_id);
        }
        if let Err(error) = self.provisioner.terminate(container_id).await {
            warn!(container_id, %error, "container delete failed, queued for retry");
            let mut state = self.state.lock().await;
            state.pending_deletes.push(container_id.to_string());
        } else {
            info!(container_id, "container deleted");
        }
    }

    /// Retry deletes that failed earlier. Invoked from a background
    /// interval job; failures stay queued.
    pub async fn run_delete_sweep(&self) {
        let pending = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.pending_deletes)
        };
        for container_id in pending {
            if let Err(error) = self.provisioner.terminate(&container_id).await {
                warn!(container_id = %container_id, %error, "container delete retry failed");
                let mut state = self.state.lock().await;
                state.pending_deletes.push(container_id);
            }
        }
    }

    /// Executor endpoint currently bound to `session_id`.
    pub async fn executor_url_for_session(&self, session_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        let container_id = state.by_session.get(session_id)?;
        state
            .containers
            .get(container_id)
            .map(|info| info.executor_url.clone())
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> ContainerStats {
        let state = self.state.lock().await;
        let containers: Vec<ContainerInfo> = state.containers.values().cloned().collect();
        ContainerStats {
            total_active: containers.len(),
            persistent_count: containers
                .iter()
                .filter(|c| c.mode == ContainerMode::Persistent)
                .count(),
            ephemeral_count: containers
                .iter()
                .filter(|c| c.mode == ContainerMode::Ephemeral)
                .count(),
            containers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use swb_error::Error;

    struct CountingProvisioner {
        provisioned: AtomicUsize,
        terminated: AtomicUsize,
        fail_terminate: std::sync::atomic::AtomicBool,
    }

    impl CountingProvisioner {
        fn new() -> Self {
            Self {
                provisioned: AtomicUsize::new(0),
                terminated: AtomicUsize::new(0),
                fail_terminate: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ContainerProvisioner for CountingProvisioner {
        async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionedContainer> {
            let n = self.provisioned.fetch_add(1, Ordering::SeqCst);
            Ok(ProvisionedContainer {
                container_id: format!("ctr-{}-{n}", request.session_id),
                executor_url: format!("http://executor-{n}:8002"),
            })
        }

        async fn terminate(&self, _container_id: &str) -> Result<()> {
            if self.fail_terminate.load(Ordering::SeqCst) {
                return Err(Error::external("terminate refused"));
            }
            self.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn cancel(&self, _container_id: &str, _session_id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn ephemeral_lives_for_exactly_one_run() {
        let provisioner = Arc::new(CountingProvisioner::new());
        let pool = ContainerPool::new(provisioner.clone());

        let (_, first) = pool
            .get_or_create_container("s1", "u1", ContainerMode::Ephemeral, None)
            .await
            .unwrap();
        pool.on_task_complete("s1").await;
        assert_eq!(provisioner.terminated.load(Ordering::SeqCst), 1);

        let (_, second) = pool
            .get_or_create_container("s1", "u1", ContainerMode::Ephemeral, None)
            .await
            .unwrap();
        assert_ne!(first, second, "ephemeral containers are never reused");
    }

    #[tokio::test]
    async fn persistent_is_reused_and_survives_completion() {
        let provisioner = Arc::new(CountingProvisioner::new());
        let pool = ContainerPool::new(provisioner.clone());

        let (_, id) = pool
            .get_or_create_container("s1", "u1", ContainerMode::Persistent, None)
            .await
            .unwrap();
        pool.on_task_complete("s1").await;
        assert_eq!(provisioner.terminated.load(Ordering::SeqCst), 0);

        let (_, reused) = pool
            .get_or_create_container("s2", "u1", ContainerMode::Persistent, Some(&id))
            .await
            .unwrap();
        assert_eq!(id, reused);
        assert_eq!(provisioner.provisioned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_deletes_ephemeral_and_updates_stats() {
        let provisioner = Arc::new(CountingProvisioner::new());
        let pool = ContainerPool::new(provisioner.clone());
        pool.get_or_create_container("s1", "u1", ContainerMode::Ephemeral, None)
            .await
            .unwrap();
        assert_eq!(pool.stats().await.ephemeral_count, 1);

        pool.cancel_task("s1").await.unwrap();
        let stats = pool.stats().await;
        assert_eq!(stats.total_active, 0);
        assert!(pool.executor_url_for_session("s1").await.is_none());
    }

    #[tokio::test]
    async fn failed_deletes_retry_on_sweep() {
        let provisioner = Arc::new(CountingProvisioner::new());
        let pool = ContainerPool::new(provisioner.clone());
        pool.get_or_create_container("s1", "u1", ContainerMode::Ephemeral, None)
            .await
            .unwrap();

        provisioner.fail_terminate.store(true, Ordering::SeqCst);
        pool.on_task_complete("s1").await;
        assert_eq!(provisioner.terminated.load(Ordering::SeqCst), 0);

        provisioner.fail_terminate.store(false, Ordering::SeqCst);
        pool.run_delete_sweep().await;
        assert_eq!(provisioner.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn binding_is_single_per_session() {
        let provisioner = Arc::new(CountingProvisioner::new());
        let pool = ContainerPool::new(provisioner);
        let (url_a, id_a) = pool
            .get_or_create_container("s1", "u1", ContainerMode::Ephemeral, None)
            .await
            .unwrap();
        let (url_b, id_b) = pool
            .get_or_create_container("s1", "u1", ContainerMode::Ephemeral, None)
            .await
            .unwrap();
        assert_eq!(id_a, id_b, "repeat lookup reuses the live binding");
        assert_eq!(url_a, url_b);
    }
}
