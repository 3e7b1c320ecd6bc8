// SPDX-License-Identifier: MIT OR Apache-2.0
//! Long-lived Manager state, constructed once at startup.

use crate::backend_client::BackendClient;
use crate::callbacks::CallbackPipeline;
use crate::dispatch::DispatchDeps;
use crate::executor_client::ExecutorClient;
use crate::export::WorkspaceExportService;
use crate::pull::{PullScheduleConfig, RunPullService, load_pull_schedule_config};
use crate::resolver::ConfigResolver;
use crate::settings::ManagerSettings;
use crate::staging::WorkspaceLayout;
use std::sync::Arc;
use swb_pool::{ContainerPool, ContainerProvisioner};
use swb_store::BlobStore;

/// Shared Manager state.
#[derive(Clone)]
pub struct ManagerState {
    /// Runtime settings.
    pub settings: Arc<ManagerSettings>,
    /// Container pool.
    pub pool: Arc<ContainerPool>,
    /// Backend client.
    pub backend: Arc<BackendClient>,
    /// The pull loop.
    pub pull: Arc<RunPullService>,
    /// Callback pipeline.
    pub pipeline: Arc<CallbackPipeline>,
    /// Local workspace layout.
    pub layout: WorkspaceLayout,
    /// Blob store.
    pub store: Arc<dyn BlobStore>,
}

impl ManagerState {
    /// Wire the full Manager object graph.
    #[must_use]
    pub fn new(
        settings: ManagerSettings,
        store: Arc<dyn BlobStore>,
        provisioner: Arc<dyn ContainerProvisioner>,
    ) -> Self {
        let settings = Arc::new(settings);
        let backend = Arc::new(BackendClient::new(
            settings.backend_url.clone(),
            settings.internal_api_token.clone(),
        ));
        let pool = Arc::new(ContainerPool::new(provisioner));
        let layout = WorkspaceLayout::new(settings.workspace_root.clone());
        let resolver = Arc::new(ConfigResolver::new(backend.clone()));

        let deps = DispatchDeps {
            backend: backend.clone(),
            executor: Arc::new(ExecutorClient::new()),
            pool: pool.clone(),
            resolver,
            layout: layout.clone(),
            store: store.clone(),
            settings: settings.clone(),
        };

        let schedule_config = settings
            .schedule_config_path
            .as_deref()
            .and_then(load_pull_schedule_config)
            .unwrap_or_else(PullScheduleConfig::default);
        let pull = Arc::new(RunPullService::new(deps, schedule_config));

        let export = Arc::new(WorkspaceExportService::new(
            store.clone(),
            layout.clone(),
            settings.ignore_policy.clone(),
            settings.export_archive_enabled,
        ));
        let pipeline = Arc::new(CallbackPipeline::new(
            backend.clone(),
            pool.clone(),
            export,
            pull.clone(),
            settings.ignore_policy.clone(),
        ));

        Self {
            settings,
            pool,
            backend,
            pull,
            pipeline,
            layout,
            store,
        }
    }
}
