// SPDX-License-Identifier: MIT OR Apache-2.0
//! Executor Manager settings from the environment.

use std::path::PathBuf;
use swb_store::ObjectStoreConfig;
use swb_workspace::IgnorePolicy;

/// Runtime settings for the Executor Manager.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Backend base URL.
    pub backend_url: String,
    /// Default executor base URL handed to the static provisioner.
    pub executor_url: String,
    /// Shared secret for internal endpoints.
    pub internal_api_token: String,
    /// Base URL executors call back on (this service).
    pub callback_base_url: String,
    /// Bearer token executors present on callbacks.
    pub callback_token: String,
    /// Global dispatch concurrency cap.
    pub max_concurrent_tasks: usize,
    /// Claim lease length, seconds.
    pub task_claim_lease_seconds: i64,
    /// Trigger debounce window, milliseconds.
    pub trigger_debounce_ms: u64,
    /// Whether the pull loop runs at all.
    pub task_pull_enabled: bool,
    /// Optional pull-schedule config file (JSON).
    pub schedule_config_path: Option<PathBuf>,
    /// Root of per-session local workspaces.
    pub workspace_root: PathBuf,
    /// Whether the idle-workspace cleanup job runs.
    pub workspace_cleanup_enabled: bool,
    /// Whether the scheduled-task feeder runs.
    pub scheduled_tasks_enabled: bool,
    /// Feeder interval, seconds.
    pub scheduled_tasks_dispatch_interval_seconds: u64,
    /// Feeder batch size.
    pub scheduled_tasks_dispatch_batch_size: usize,
    /// Export/state-patch ignore policy.
    pub ignore_policy: IgnorePolicy,
    /// Whether terminal exports also produce an archive.
    pub export_archive_enabled: bool,
    /// Object store settings.
    pub object_store: ObjectStoreConfig,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            backend_url: "http://localhost:8000".to_string(),
            executor_url: "http://localhost:8002".to_string(),
            internal_api_token: String::new(),
            callback_base_url: "http://localhost:8001".to_string(),
            callback_token: String::new(),
            max_concurrent_tasks: 8,
            task_claim_lease_seconds: 30,
            trigger_debounce_ms: 50,
            task_pull_enabled: true,
            schedule_config_path: None,
            workspace_root: PathBuf::from("./workspaces"),
            workspace_cleanup_enabled: false,
            scheduled_tasks_enabled: true,
            scheduled_tasks_dispatch_interval_seconds: 30,
            scheduled_tasks_dispatch_batch_size: 50,
            ignore_policy: IgnorePolicy::default(),
            export_archive_enabled: true,
            object_store: ObjectStoreConfig::default(),
        }
    }
}

impl ManagerSettings {
    /// Read settings from the environment, defaulting anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let get = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let flag = |name: &str, default: bool| {
            get(name)
                .map(|v| v != "false" && v != "0")
                .unwrap_or(default)
        };
        let defaults = Self::default();

        let mut ignore_policy = IgnorePolicy::default();
        if let Some(names) = get("WORKSPACE_EXPORT_IGNORE") {
            ignore_policy.names = names
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        ignore_policy.ignore_dotfiles = flag("WORKSPACE_EXPORT_IGNORE_DOTFILES", true);

        Self {
            host: get("MANAGER_HOST").unwrap_or(defaults.host),
            port: get("MANAGER_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            backend_url: get("BACKEND_URL").unwrap_or(defaults.backend_url),
            executor_url: get("EXECUTOR_URL").unwrap_or(defaults.executor_url),
            internal_api_token: get("INTERNAL_API_TOKEN").unwrap_or_default(),
            callback_base_url: get("CALLBACK_BASE_URL").unwrap_or(defaults.callback_base_url),
            callback_token: get("CALLBACK_TOKEN").unwrap_or_default(),
            max_concurrent_tasks: get("MAX_CONCURRENT_TASKS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_concurrent_tasks),
            task_claim_lease_seconds: get("TASK_CLAIM_LEASE_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.task_claim_lease_seconds),
            trigger_debounce_ms: get("TRIGGER_DEBOUNCE_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.trigger_debounce_ms),
            task_pull_enabled: flag("TASK_PULL_ENABLED", defaults.task_pull_enabled),
            schedule_config_path: get("SCHEDULE_CONFIG_PATH").map(PathBuf::from),
            workspace_root: get("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            workspace_cleanup_enabled: flag(
                "WORKSPACE_CLEANUP_ENABLED",
                defaults.workspace_cleanup_enabled,
            ),
            scheduled_tasks_enabled: flag("SCHEDULED_TASKS_ENABLED", defaults.scheduled_tasks_enabled),
            scheduled_tasks_dispatch_interval_seconds: get(
                "SCHEDULED_TASKS_DISPATCH_INTERVAL_SECONDS",
            )
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.scheduled_tasks_dispatch_interval_seconds),
            scheduled_tasks_dispatch_batch_size: get("SCHEDULED_TASKS_DISPATCH_BATCH_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.scheduled_tasks_dispatch_batch_size),
            ignore_policy,
            export_archive_enabled: flag("WORKSPACE_EXPORT_ARCHIVE", defaults.export_archive_enabled),
            object_store: ObjectStoreConfig::from_env(),
        }
    }

    /// Worker identity: `<hostname>:<pid>`.
    #[must_use]
    pub fn worker_id() -> String {
        let hostname = std::env::var("HOSTNAME")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        format!("{hostname}:{}", std::process::id())
    }
}
