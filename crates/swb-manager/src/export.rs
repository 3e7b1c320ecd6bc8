// SPDX-License-Identifier: MIT OR Apache-2.0
//! Terminal workspace export: upload the workspace tree and a
//! normalized manifest to the blob store, optionally with a zip
//! archive.

use crate::staging::WorkspaceLayout;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swb_core::WorkspaceExportStatus;
use swb_error::{Error, ErrorKind, Result};
use swb_store::{BlobStore, keys};
use swb_workspace::{IgnorePolicy, WalkedFile, collect_workspace_files};
use tracing::{info, warn};

/// Outcome of a workspace export, carried on the follow-up callback.
#[derive(Debug, Clone)]
pub struct ExportResult {
    /// Prefix under which files were uploaded.
    pub workspace_files_prefix: String,
    /// Manifest object key.
    pub workspace_manifest_key: String,
    /// Archive object key, when archiving is enabled.
    pub workspace_archive_key: Option<String>,
    /// Always `ready` on a successful export.
    pub workspace_export_status: WorkspaceExportStatus,
}

/// Exports session workspaces after terminal callbacks.
pub struct WorkspaceExportService {
    store: Arc<dyn BlobStore>,
    layout: WorkspaceLayout,
    policy: IgnorePolicy,
    archive_enabled: bool,
}

fn write_archive(path: &Path, files: &[WalkedFile]) -> Result<()> {
    let file = std::fs::File::create(path)
        .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for entry in files {
        writer
            .start_file(entry.rel_path.clone(), options)
            .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))?;
        let mut source = std::fs::File::open(&entry.abs_path)
            .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))?;
        std::io::copy(&mut source, &mut writer)
            .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))?;
    }
    writer
        .finish()
        .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))?;
    Ok(())
}

impl WorkspaceExportService {
    /// Service over `store` and the local workspace layout.
    pub fn new(
        store: Arc<dyn BlobStore>,
        layout: WorkspaceLayout,
        policy: IgnorePolicy,
        archive_enabled: bool,
    ) -> Self {
        Self {
            store,
            layout,
            policy,
            archive_enabled,
        }
    }

    /// The policy files are filtered through.
    #[must_use]
    pub fn policy(&self) -> &IgnorePolicy {
        &self.policy
    }

    fn workspace_dir(&self, session_id: &str) -> Result<PathBuf> {
        let session_dir = self.layout.find_session_dir(session_id).ok_or_else(|| {
            Error::new(
                ErrorKind::WorkspaceNotFound,
                format!("Workspace not found for session {session_id}"),
            )
        })?;
        let workspace = session_dir.join("workspace");
        if !workspace.is_dir() {
            return Err(Error::new(
                ErrorKind::WorkspaceNotFound,
                format!("Workspace not found for session {session_id}"),
            ));
        }
        Ok(workspace)
    }

    /// Export the session workspace. Uploads every allowed file under
    /// `sessions/<id>/files/`, writes `manifest.json`, and (when
    /// enabled) `archive.zip`.
    pub async fn export_workspace(&self, session_id: &str) -> Result<ExportResult> {
        let workspace = self.workspace_dir(session_id)?;
        let policy = self.policy.clone();
        let walk_root = workspace.clone();
        let files = tokio::task::spawn_blocking(move || {
            collect_workspace_files(&walk_root, &policy)
        })
        .await
        .map_err(|e| Error::external(format!("export walk panicked: {e}")))?
        .map_err(|e| Error::external(format!("export walk failed: {e}")))?;

        let prefix = keys::session_files_prefix(session_id);
        let mut manifest_files: Vec<Value> = Vec::with_capacity(files.len());
        for entry in &files {
            let key = keys::session_file_key(session_id, &entry.rel_path);
            self.store
                .upload_file(&entry.abs_path, &key, entry.mime_type.as_deref())
                .await?;
            manifest_files.push(json!({
                "path": format!("/{}", entry.rel_path),
                "key": key,
                "size": entry.size,
                "mimeType": entry.mime_type,
                "sha256": entry.sha256,
            }));
        }

        let manifest_key = keys::session_manifest_key(session_id);
        let manifest = json!({"files": manifest_files});
        self.store
            .put_object(
                &manifest_key,
                serde_json::to_vec(&manifest)
                    .map_err(|e| Error::external(format!("serialize manifest: {e}")))?,
                Some("application/json"),
            )
            .await?;

        let mut archive_key = None;
        if self.archive_enabled {
            match self.upload_archive(session_id, &files).await {
                Ok(key) => archive_key = Some(key),
                // The manifest and files are already usable; a missing
                // archive only disables the download-all affordance.
                Err(error) => {
                    warn!(session_id, %error, "workspace archive failed");
                }
            }
        }

        info!(
            session_id,
            file_count = files.len(),
            manifest_key = %manifest_key,
            "workspace exported"
        );
        Ok(ExportResult {
            workspace_files_prefix: prefix,
            workspace_manifest_key: manifest_key,
            workspace_archive_key: archive_key,
            workspace_export_status: WorkspaceExportStatus::Ready,
        })
    }

    async fn upload_archive(&self, session_id: &str, files: &[WalkedFile]) -> Result<String> {
        let tmp = tempfile::Builder::new()
            .prefix("swb-export-")
            .suffix(".zip")
            .tempfile()
            .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))?;
        let archive_path = tmp.path().to_path_buf();

        let files = files.to_vec();
        let write_path = archive_path.clone();
        tokio::task::spawn_blocking(move || write_archive(&write_path, &files))
            .await
            .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))??;

        let key = keys::session_archive_key(session_id);
        self.store
            .upload_file(&archive_path, &key, Some("application/zip"))
            .await?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swb_store::MemoryStore;

    async fn exported_fixture() -> (Arc<MemoryStore>, ExportResult, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(tmp.path());
        let workspace = layout.ensure_workspace("u1", "sess1").unwrap();
        std::fs::create_dir_all(workspace.join("src")).unwrap();
        std::fs::create_dir_all(workspace.join(".claude_data/skills")).unwrap();
        std::fs::write(workspace.join("src/main.rs"), b"fn main() {}").unwrap();
        std::fs::write(workspace.join("README.md"), b"# readme").unwrap();
        std::fs::write(workspace.join(".claude_data/skills/x"), b"skip").unwrap();

        let store = Arc::new(MemoryStore::new());
        let service = WorkspaceExportService::new(
            store.clone(),
            layout,
            IgnorePolicy::default(),
            true,
        );
        let result = service.export_workspace("sess1").await.unwrap();
        (store, result, tmp)
    }

    #[tokio::test]
    async fn export_uploads_files_manifest_and_archive() {
        let (store, result, _tmp) = exported_fixture().await;
        assert_eq!(result.workspace_export_status, WorkspaceExportStatus::Ready);
        assert_eq!(result.workspace_files_prefix, "sessions/sess1/files");
        assert_eq!(result.workspace_archive_key.as_deref(), Some("sessions/sess1/archive.zip"));

        let manifest = store
            .get_manifest("sessions/sess1/manifest.json")
            .await
            .unwrap();
        let files = manifest["files"].as_array().unwrap();
        let paths: Vec<&str> = files.iter().filter_map(|f| f["path"].as_str()).collect();
        assert_eq!(paths, vec!["/README.md", "/src/main.rs"]);
        assert!(files.iter().all(|f| f["sha256"].as_str().is_some()));

        assert!(
            store
                .get_object("sessions/sess1/files/src/main.rs")
                .await
                .is_ok()
        );
        assert!(store.get_object("sessions/sess1/archive.zip").await.is_ok());
    }

    #[tokio::test]
    async fn missing_workspace_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let service = WorkspaceExportService::new(
            Arc::new(MemoryStore::new()),
            WorkspaceLayout::new(tmp.path()),
            IgnorePolicy::default(),
            false,
        );
        let err = service.export_workspace("nope").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::WorkspaceNotFound);
    }
}
