// SPDX-License-Identifier: MIT OR Apache-2.0
//! WebSocket fan-out: builds event payloads from persisted state and
//! broadcasts them on session and user channels.

use crate::repo::{Database, StoredMessage};
use crate::sessions;
use crate::ws::{ConnectionRegistry, EventType, WsEvent, user_channel};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use swb_core::{AgentCallback, Session, SessionStatus, SkillImportJob, WorkspaceExportStatus};
use swb_store::{BlobStore, PresignOptions};
use swb_workspace::{attach_file_urls, build_nodes_from_manifest, extract_manifest_files};
use tracing::{debug, warn};
use uuid::Uuid;

/// Event builders and broadcast entry points for the Backend.
pub struct WsFanout {
    db: Arc<Database>,
    store: Arc<dyn BlobStore>,
    registry: Arc<ConnectionRegistry>,
}

impl WsFanout {
    /// Wire the fan-out over its collaborators.
    pub fn new(
        db: Arc<Database>,
        store: Arc<dyn BlobStore>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            db,
            store,
            registry,
        }
    }

    /// The registry this fan-out broadcasts through.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    fn progress_for(&self, session: &Session) -> u8 {
        if session.status == SessionStatus::Completed {
            return 100;
        }
        self.db
            .runs
            .latest_for_session(session.session_id)
            .map_or(0, |run| run.progress)
    }

    /// Full session snapshot, or a `not_found` placeholder.
    #[must_use]
    pub fn session_snapshot_event(&self, session_id: &str) -> WsEvent {
        match sessions::find_by_sdk_id_or_uuid(&self.db, session_id) {
            Some(session) => WsEvent::new(
                EventType::SessionSnapshot,
                session.session_id.to_string(),
                json!({
                    "status": session.status,
                    "progress": self.progress_for(&session),
                    "state_patch": session.state_patch.clone().map_or(json!({}), |p| json!(p)),
                    "config_snapshot": session.config_snapshot,
                    "workspace_export_status": session.workspace_export_status,
                    "workspace_manifest_key": session.workspace_manifest_key,
                    "workspace_files_prefix": session.workspace_files_prefix,
                    "title": session.title,
                    "updated_at": session.updated_at,
                }),
            ),
            None => WsEvent::new(
                EventType::SessionSnapshot,
                session_id,
                json!({
                    "status": "not_found",
                    "progress": 0,
                    "state_patch": {},
                    "config_snapshot": null,
                    "workspace_export_status": null,
                    "workspace_manifest_key": null,
                    "workspace_files_prefix": null,
                    "title": null,
                    "updated_at": null,
                }),
            ),
        }
    }

    /// Pending user-input requests for a session.
    #[must_use]
    pub fn user_input_event(&self, session_id: Uuid) -> WsEvent {
        let requests = self.db.pending_input_requests(session_id);
        WsEvent::new(
            EventType::UserInputUpdate,
            session_id.to_string(),
            json!({"requests": requests}),
        )
    }

    async fn presign_inline(&self, key: &str, mime_type: Option<String>) -> Option<String> {
        match self
            .store
            .presign_get(key, &PresignOptions::inline(mime_type))
            .await
        {
            Ok(url) => Some(url),
            Err(error) => {
                warn!(key, %error, "presign failed");
                None
            }
        }
    }

    /// Workspace files payload: `{export_status, files, error}`.
    pub async fn workspace_files_payload(
        &self,
        manifest_key: Option<&str>,
        files_prefix: Option<&str>,
        export_status: Option<WorkspaceExportStatus>,
    ) -> Value {
        let Some(manifest_key) = manifest_key else {
            return json!({
                "export_status": export_status,
                "files": [],
                "error": "Workspace export is not ready",
            });
        };

        let manifest = match self.store.get_manifest(manifest_key).await {
            Ok(manifest) => manifest,
            Err(error) => {
                warn!(manifest_key, %error, "workspace files build failed");
                return json!({
                    "export_status": export_status,
                    "files": [],
                    "error": "Failed to build workspace files",
                });
            }
        };

        let mut url_map: HashMap<String, String> = HashMap::new();
        for file in extract_manifest_files(&manifest) {
            let Some(path) = file.path.clone() else { continue };
            let Some(key) = file.object_key(files_prefix) else { continue };
            if let Some(url) = self.presign_inline(&key, file.mime_type.clone()).await {
                url_map.insert(path, url);
            }
        }

        let mut nodes = build_nodes_from_manifest(&manifest);
        attach_file_urls(&mut nodes, &|path| url_map.get(path).cloned());

        json!({
            "export_status": export_status,
            "files": nodes,
            "error": null,
        })
    }

    /// Rebuilt file-tree event for a session.
    pub async fn workspace_files_event(&self, session_id: Uuid) -> Option<WsEvent> {
        let session = self.db.session(session_id)?;
        let payload = self
            .workspace_files_payload(
                session.workspace_manifest_key.as_deref(),
                session.workspace_files_prefix.as_deref(),
                session.workspace_export_status,
            )
            .await;
        Some(WsEvent::new(
            EventType::WorkspaceFiles,
            session_id.to_string(),
            payload,
        ))
    }

    /// On-demand presigned URL for one workspace file.
    pub async fn workspace_file_url_event(&self, session_id: Uuid, path: &str) -> Option<WsEvent> {
        let normalized = swb_workspace::normalize_path(path)?;
        let session = self.db.session(session_id)?;

        let mut url = None;
        if let Some(manifest_key) = session.workspace_manifest_key.as_deref() {
            if let Ok(manifest) = self.store.get_manifest(manifest_key).await {
                if let Some(entry) = swb_workspace::find_manifest_file(&manifest, &normalized) {
                    if let Some(key) =
                        entry.object_key(session.workspace_files_prefix.as_deref())
                    {
                        url = self.presign_inline(&key, entry.mime_type.clone()).await;
                    }
                }
            }
        }

        Some(WsEvent::new(
            EventType::WorkspaceFileUrl,
            session_id.to_string(),
            json!({"path": normalized, "url": url}),
        ))
    }

    /// Skill-import job event for the owner's user channel.
    #[must_use]
    pub fn skill_import_job_event(job: &SkillImportJob) -> WsEvent {
        WsEvent::new(
            EventType::SkillImportJob,
            user_channel(&job.user_id),
            json!({
                "job_id": job.id,
                "status": job.status,
                "progress": job.progress,
                "result": job.result,
                "error": job.error,
                "created_at": job.created_at,
                "updated_at": job.updated_at,
                "started_at": job.started_at,
                "finished_at": job.finished_at,
            }),
        )
    }

    /// Broadcast the pending user-input list for a session.
    pub async fn broadcast_user_input(&self, session_id: Uuid) {
        let event = self.user_input_event(session_id);
        self.registry
            .broadcast(&session_id.to_string(), &event)
            .await;
    }

    /// Broadcast a skill-import job update on the owner's user channel.
    pub async fn broadcast_import_job(&self, job_id: Uuid) {
        let Some(job) = self.db.import_job(job_id) else {
            return;
        };
        let event = Self::skill_import_job_event(&job);
        self.registry
            .broadcast(&user_channel(&job.user_id), &event)
            .await;
    }

    /// Fan a processed callback out as WebSocket events: status, patch,
    /// message, export status, and the rebuilt file tree when the
    /// export became ready.
    pub async fn broadcast_callback(
        &self,
        session: &Session,
        callback: &AgentCallback,
        message: Option<&StoredMessage>,
    ) {
        let key = session.session_id.to_string();
        if !self.registry.has_connections(&key).await {
            return;
        }

        let status_event = WsEvent::new(
            EventType::SessionStatus,
            key.clone(),
            json!({
                "status": callback.status,
                "progress": callback.progress,
                "current_step": callback
                    .state_patch
                    .as_ref()
                    .and_then(|patch| patch.current_step.clone()),
            }),
        );
        let sent = self.registry.broadcast(&key, &status_event).await;
        debug!(session_id = %key, sent_count = sent, "ws status broadcast");

        if let Some(patch) = &callback.state_patch {
            let patch_event = WsEvent::new(
                EventType::SessionPatch,
                key.clone(),
                json!({"state_patch": patch}),
            );
            self.registry.broadcast(&key, &patch_event).await;
        }

        if let Some(message) = message {
            let message_event = WsEvent::new(
                EventType::MessageNew,
                key.clone(),
                json!({
                    "id": message.id,
                    "role": message.role,
                    "content": message.content,
                    "timestamp": message.created_at,
                    "text_preview": message.text_preview,
                }),
            );
            self.registry.broadcast(&key, &message_event).await;
        }

        if let Some(export_status) = callback.workspace_export_status {
            let export_event = WsEvent::new(
                EventType::WorkspaceExport,
                key.clone(),
                json!({
                    "export_status": export_status,
                    "workspace_manifest_key": callback.workspace_manifest_key,
                    "workspace_files_prefix": callback.workspace_files_prefix,
                    "workspace_archive_key": callback.workspace_archive_key,
                }),
            );
            self.registry.broadcast(&key, &export_event).await;

            if export_status == WorkspaceExportStatus::Ready
                && callback.workspace_manifest_key.is_some()
            {
                let payload = self
                    .workspace_files_payload(
                        callback.workspace_manifest_key.as_deref(),
                        callback.workspace_files_prefix.as_deref(),
                        Some(export_status),
                    )
                    .await;
                let files_event = WsEvent::new(EventType::WorkspaceFiles, key.clone(), payload);
                self.registry.broadcast(&key, &files_event).await;
            }
        }
    }
}
