// SPDX-License-Identifier: MIT OR Apache-2.0
//! Backend settings from the environment.

use swb_store::ObjectStoreConfig;

/// Runtime settings for the Backend service.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Executor Manager base URL (pull triggers, schedules proxy).
    pub executor_manager_url: String,
    /// Shared secret for internal endpoints.
    pub internal_api_token: String,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Run-queue recovery sweep interval, seconds.
    pub lease_sweep_interval_seconds: u64,
    /// Object store settings.
    pub object_store: ObjectStoreConfig,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            executor_manager_url: "http://localhost:8001".to_string(),
            internal_api_token: String::new(),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            lease_sweep_interval_seconds: 10,
            object_store: ObjectStoreConfig::default(),
        }
    }
}

impl BackendSettings {
    /// Read settings from the environment, defaulting anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let get = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let defaults = Self::default();
        Self {
            host: get("BACKEND_HOST").unwrap_or(defaults.host),
            port: get("BACKEND_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            executor_manager_url: get("EXECUTOR_MANAGER_URL")
                .unwrap_or(defaults.executor_manager_url),
            internal_api_token: get("INTERNAL_API_TOKEN").unwrap_or_default(),
            cors_origins: get("CORS_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            lease_sweep_interval_seconds: get("TASK_LEASE_SWEEP_INTERVAL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.lease_sweep_interval_seconds),
            object_store: ObjectStoreConfig::from_env(),
        }
    }
}
