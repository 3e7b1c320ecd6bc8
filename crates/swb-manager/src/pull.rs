// SPDX-License-Identifier: MIT OR Apache-2.0
//! The run pull loop.
//!
//! Three sources drive claiming: interval rules, time-bounded windows
//! opened by calendar triggers, and explicit triggers from the Backend
//! or the callback pipeline. Triggers within the debounce window are
//! coalesced; the fired poll claims under the union of requested
//! modes. A semaphore caps in-flight dispatches globally.

use crate::backend_client::BackendClient;
use crate::dispatch::{self, DispatchDeps};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swb_core::{RequestContext, ScheduleMode};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Schedule config
// ---------------------------------------------------------------------------

/// One pull-schedule rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PullRule {
    /// Poll every `seconds` for the given modes.
    Interval {
        /// Rule identifier.
        id: String,
        /// Whether the rule is active.
        #[serde(default = "default_enabled")]
        enabled: bool,
        /// Modes polled by this rule.
        schedule_modes: Vec<ScheduleMode>,
        /// Poll period.
        seconds: u64,
        /// Poll once at startup too.
        #[serde(default)]
        start_immediately: bool,
    },
    /// Poll only while a window opened by a trigger is active.
    Window {
        /// Window identifier.
        id: String,
        /// Whether the rule is active.
        #[serde(default = "default_enabled")]
        enabled: bool,
        /// Modes polled while the window is open.
        schedule_modes: Vec<ScheduleMode>,
        /// Window length once opened.
        window_minutes: i64,
        /// Companion poll period while open.
        poll_seconds: u64,
        /// Open the window at startup.
        #[serde(default)]
        start_immediately: bool,
    },
}

fn default_enabled() -> bool {
    true
}

impl PullRule {
    fn enabled(&self) -> bool {
        match self {
            Self::Interval { enabled, .. } | Self::Window { enabled, .. } => *enabled,
        }
    }

    fn schedule_modes(&self) -> &[ScheduleMode] {
        match self {
            Self::Interval { schedule_modes, .. } | Self::Window { schedule_modes, .. } => {
                schedule_modes
            }
        }
    }
}

/// The active pull schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullScheduleConfig {
    /// Master switch.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Rules, evaluated independently.
    #[serde(default)]
    pub rules: Vec<PullRule>,
}

impl Default for PullScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: vec![
                PullRule::Interval {
                    id: "immediate".to_string(),
                    enabled: true,
                    schedule_modes: vec![ScheduleMode::Immediate],
                    seconds: 2,
                    start_immediately: true,
                },
                PullRule::Interval {
                    id: "scheduled".to_string(),
                    enabled: true,
                    schedule_modes: vec![ScheduleMode::Scheduled],
                    seconds: 15,
                    start_immediately: false,
                },
            ],
        }
    }
}

/// Load a schedule config from a JSON file; `None` on any error so the
/// caller falls back to defaults.
#[must_use]
pub fn load_pull_schedule_config(path: &Path) -> Option<PullScheduleConfig> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path.display(), %error, "schedule config not readable");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(config) => Some(config),
        Err(error) => {
            warn!(path = %path.display(), %error, "schedule config not valid JSON");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// RunPullService
// ---------------------------------------------------------------------------

/// Background service that claims queued runs and dispatches them.
pub struct RunPullService {
    deps: DispatchDeps,
    config: PullScheduleConfig,
    worker_id: String,
    max_concurrent: usize,
    lease_seconds: i64,
    debounce_window: Duration,
    semaphore: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    shutdown: AtomicBool,
    logged_started: AtomicBool,
    windows_until: StdMutex<HashMap<String, DateTime<Utc>>>,
    pending_trigger: StdMutex<Option<BTreeSet<ScheduleMode>>>,
}

impl RunPullService {
    /// Build the service over its dispatch dependencies.
    #[must_use]
    pub fn new(deps: DispatchDeps, config: PullScheduleConfig) -> Self {
        let settings = deps.settings.clone();
        Self {
            deps,
            config,
            worker_id: crate::settings::ManagerSettings::worker_id(),
            max_concurrent: settings.max_concurrent_tasks.max(1),
            lease_seconds: settings.task_claim_lease_seconds.max(5),
            debounce_window: Duration::from_millis(settings.trigger_debounce_ms.max(1)),
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent_tasks.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            shutdown: AtomicBool::new(false),
            logged_started: AtomicBool::new(false),
            windows_until: StdMutex::new(HashMap::new()),
            pending_trigger: StdMutex::new(None),
        }
    }

    /// This worker's identity (`<hostname>:<pid>`).
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// The schedule config the service was started with.
    #[must_use]
    pub fn schedule_config(&self) -> &PullScheduleConfig {
        &self.config
    }

    /// Number of dispatches currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    /// Union of modes across enabled rules; triggers for other modes
    /// are rejected.
    #[must_use]
    pub fn get_active_schedule_modes(&self) -> Vec<ScheduleMode> {
        if !self.config.enabled {
            return Vec::new();
        }
        let mut modes = BTreeSet::new();
        for rule in self.config.rules.iter().filter(|r| r.enabled()) {
            modes.extend(rule.schedule_modes().iter().copied());
        }
        modes.into_iter().collect()
    }

    /// Poll the Backend queue and dispatch as many runs as capacity
    /// allows.
    pub async fn poll(self: &Arc<Self>, schedule_modes: Option<Vec<ScheduleMode>>) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if !self.logged_started.swap(true, Ordering::SeqCst) {
            info!(
                worker_id = %self.worker_id,
                lease_seconds = self.lease_seconds,
                max_concurrent = self.max_concurrent,
                "run pull service started"
            );
        }

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                return;
            };

            let ctx = RequestContext::generate();
            let claim = match self
                .deps
                .backend
                .claim_run_with_backoff(
                    &ctx,
                    &self.worker_id,
                    self.lease_seconds,
                    schedule_modes.as_deref(),
                )
                .await
            {
                Ok(claim) => claim,
                Err(error) => {
                    error!(%error, "failed to claim run from backend");
                    drop(permit);
                    return;
                }
            };
            let Some(claim) = claim else {
                drop(permit);
                return;
            };

            let service = Arc::clone(self);
            let mut tasks = self.tasks.lock().await;
            tasks.spawn(async move {
                let _permit = permit;
                dispatch::dispatch(&service.deps, &service.worker_id, claim, ctx).await;
            });
            // Reap finished dispatches so the set does not grow without
            // bound on a long-lived worker.
            while tasks.try_join_next().is_some() {}
        }
    }

    /// Debounced trigger. Returns `true` when the trigger armed the
    /// timer or widened the pending mode set; `false` when it was
    /// wholly absorbed by a pending trigger.
    pub fn trigger_poll(
        self: &Arc<Self>,
        schedule_modes: &[ScheduleMode],
        reason: Option<&str>,
    ) -> bool {
        if self.shutdown.load(Ordering::SeqCst) || schedule_modes.is_empty() {
            return false;
        }

        let mut pending = self
            .pending_trigger
            .lock()
            .expect("pull trigger lock poisoned");
        if let Some(modes) = pending.as_mut() {
            let before = modes.len();
            modes.extend(schedule_modes.iter().copied());
            let widened = modes.len() > before;
            if !widened {
                debug!(reason = reason.unwrap_or(""), "pull trigger debounced");
            }
            return widened;
        }

        *pending = Some(schedule_modes.iter().copied().collect());
        drop(pending);

        debug!(
            reason = reason.unwrap_or(""),
            debounce_ms = self.debounce_window.as_millis() as u64,
            "pull trigger armed"
        );
        let service = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(service.debounce_window).await;
            let modes = service
                .pending_trigger
                .lock()
                .expect("pull trigger lock poisoned")
                .take();
            if let Some(modes) = modes {
                service.poll(Some(modes.into_iter().collect())).await;
            }
        });
        true
    }

    /// Record a window deadline directly (used by tests and by resumed
    /// state).
    pub fn set_window_until(&self, window_id: &str, until_utc: DateTime<Utc>) {
        let window_id = window_id.trim();
        if window_id.is_empty() {
            return;
        }
        self.windows_until
            .lock()
            .expect("windows lock poisoned")
            .insert(window_id.to_string(), until_utc);
    }

    /// Open a window for `window_minutes` and poll immediately.
    pub async fn open_window(
        self: &Arc<Self>,
        window_id: &str,
        schedule_modes: Option<Vec<ScheduleMode>>,
        window_minutes: i64,
    ) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let window_id = window_id.trim();
        if window_id.is_empty() {
            return;
        }
        let minutes = if window_minutes <= 0 { 60 } else { window_minutes };
        let until = Utc::now() + ChronoDuration::minutes(minutes);
        self.set_window_until(window_id, until);
        info!(window_id, until = %until, schedule_modes = ?schedule_modes, "window opened");
        self.poll(schedule_modes).await;
    }

    /// Companion poll while a window is open; a no-op once it lapses.
    pub async fn poll_window(
        self: &Arc<Self>,
        window_id: &str,
        schedule_modes: Option<Vec<ScheduleMode>>,
    ) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let window_id = window_id.trim();
        if window_id.is_empty() {
            return;
        }
        let open = {
            let mut windows = self.windows_until.lock().expect("windows lock poisoned");
            match windows.get(window_id) {
                Some(until) if Utc::now() < *until => true,
                Some(_) => {
                    windows.remove(window_id);
                    false
                }
                None => false,
            }
        };
        if open {
            self.poll(schedule_modes).await;
        }
    }

    /// Request shutdown and drain in-flight dispatch tasks.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().await;
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        info!("run pull service stopped");
    }
}

// ---------------------------------------------------------------------------
// Job registration
// ---------------------------------------------------------------------------

/// Spawn one background job per enabled schedule rule. Handles run
/// until aborted or shutdown.
pub fn register_pull_jobs(service: &Arc<RunPullService>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    if !service.config.enabled {
        return handles;
    }
    for rule in service.config.rules.clone() {
        if !rule.enabled() {
            continue;
        }
        match rule {
            PullRule::Interval {
                id,
                schedule_modes,
                seconds,
                start_immediately,
                ..
            } => {
                let service = Arc::clone(service);
                handles.push(tokio::spawn(async move {
                    debug!(rule_id = %id, seconds, "interval pull job started");
                    if start_immediately {
                        service.poll(Some(schedule_modes.clone())).await;
                    }
                    loop {
                        tokio::time::sleep(Duration::from_secs(seconds.max(1))).await;
                        if service.shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        service.poll(Some(schedule_modes.clone())).await;
                    }
                }));
            }
            PullRule::Window {
                id,
                schedule_modes,
                window_minutes,
                poll_seconds,
                start_immediately,
                ..
            } => {
                let service = Arc::clone(service);
                handles.push(tokio::spawn(async move {
                    debug!(rule_id = %id, poll_seconds, "window pull job started");
                    if start_immediately {
                        service
                            .open_window(&id, Some(schedule_modes.clone()), window_minutes)
                            .await;
                    }
                    loop {
                        tokio::time::sleep(Duration::from_secs(poll_seconds.max(1))).await;
                        if service.shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        service
                            .poll_window(&id, Some(schedule_modes.clone()))
                            .await;
                    }
                }));
            }
        }
    }
    handles
}

/// Ask the Backend to surface due scheduled runs and wake the pull loop
/// when any are ready.
pub fn spawn_scheduled_task_feeder(
    service: Arc<RunPullService>,
    backend: Arc<BackendClient>,
    interval_seconds: u64,
    batch_size: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(interval_seconds.max(5));
        loop {
            tokio::time::sleep(period).await;
            if service.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let ctx = RequestContext::generate();
            match backend
                .dispatch_due_scheduled_tasks(&ctx, batch_size.max(1))
                .await
            {
                Ok(payload) => {
                    let dispatched = payload["dispatched"].as_u64().unwrap_or(0);
                    if dispatched > 0 {
                        service.trigger_poll(
                            &[ScheduleMode::Scheduled],
                            Some("dispatch_due_scheduled_tasks"),
                        );
                    }
                    info!(dispatched, batch_size, "scheduled tasks dispatch");
                }
                Err(error) => {
                    error!(%error, batch_size, "scheduled tasks dispatch failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_covers_both_modes() {
        let config = PullScheduleConfig::default();
        assert!(config.enabled);
        assert_eq!(config.rules.len(), 2);
    }

    #[test]
    fn rules_parse_from_json() {
        let raw = r#"{
            "enabled": true,
            "rules": [
                {"type": "interval", "id": "fast", "schedule_modes": ["immediate"], "seconds": 2},
                {"type": "window", "id": "morning", "schedule_modes": ["scheduled"],
                 "window_minutes": 60, "poll_seconds": 15, "start_immediately": true}
            ]
        }"#;
        let config: PullScheduleConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.rules.len(), 2);
        assert!(matches!(config.rules[1], PullRule::Window { window_minutes: 60, .. }));
    }
}
