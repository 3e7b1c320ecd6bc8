// SPDX-License-Identifier: MIT OR Apache-2.0
//! Long-lived application state, constructed once at startup and passed
//! to handlers and background tasks as a dependency.

use crate::repo::Database;
use crate::settings::BackendSettings;
use crate::ws::ConnectionRegistry;
use crate::ws_service::WsFanout;
use std::sync::Arc;
use swb_store::BlobStore;
use tokio::sync::Notify;

/// Shared Backend state.
#[derive(Clone)]
pub struct AppState {
    /// All persisted entities.
    pub db: Arc<Database>,
    /// Blob store for manifests and presigning.
    pub store: Arc<dyn BlobStore>,
    /// WebSocket connection registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Event builders and broadcast entry points.
    pub fanout: Arc<WsFanout>,
    /// Runtime settings.
    pub settings: Arc<BackendSettings>,
    /// Outbound HTTP client (pull triggers, schedules proxy).
    pub http: reqwest::Client,
    /// Wakes the skill-import worker after an enqueue.
    pub import_wakeup: Arc<Notify>,
}

impl AppState {
    /// Wire up state over the given collaborators.
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        store: Arc<dyn BlobStore>,
        settings: BackendSettings,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let fanout = Arc::new(WsFanout::new(db.clone(), store.clone(), registry.clone()));
        Self {
            db,
            store,
            registry,
            fanout,
            settings: Arc::new(settings),
            http: reqwest::Client::new(),
            import_wakeup: Arc::new(Notify::new()),
        }
    }
}
