// SPDX-License-Identifier: MIT OR Apache-2.0
//! Local workspace administration: disk stats, per-user listings,
//! archiving, deletion, and traversal-safe file serving.

use crate::staging::WorkspaceLayout;
use serde::Serialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use swb_error::{Error, ErrorKind, Result};
use swb_workspace::{
    FileNode, IgnorePolicy, ManifestFile, build_tree_from_files, collect_workspace_files,
    safe_join,
};
use tracing::info;
use walkdir::WalkDir;

/// One session workspace in a per-user listing.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceSummary {
    /// Session id (directory name).
    pub session_id: String,
    /// Absolute path on disk.
    pub path: String,
    /// Total bytes under the workspace.
    pub size_bytes: u64,
}

fn dir_size(path: &std::path::Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Disk usage statistics plus the effective export ignore policy.
#[must_use]
pub fn disk_usage(layout: &WorkspaceLayout, policy: &IgnorePolicy) -> Value {
    let root = layout.root();
    let mut user_count = 0usize;
    let mut session_count = 0usize;
    if let Ok(users) = std::fs::read_dir(root) {
        for user in users.flatten() {
            if !user.path().is_dir() {
                continue;
            }
            user_count += 1;
            if let Ok(sessions) = std::fs::read_dir(user.path()) {
                session_count += sessions.flatten().filter(|s| s.path().is_dir()).count();
            }
        }
    }
    json!({
        "workspace_root": root.to_string_lossy(),
        "total_bytes": dir_size(root),
        "user_count": user_count,
        "session_count": session_count,
        "export_ignore": policy,
    })
}

/// All session workspaces of one user.
#[must_use]
pub fn user_workspaces(layout: &WorkspaceLayout, user_id: &str) -> Vec<WorkspaceSummary> {
    let Ok(user_dir) = layout.user_dir(user_id) else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir(&user_dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let session_id = entry.file_name().to_str()?.to_string();
            Some(WorkspaceSummary {
                path: entry.path().to_string_lossy().to_string(),
                size_bytes: dir_size(&entry.path()),
                session_id,
            })
        })
        .collect()
}

/// Archive a session directory into `<root>/_archives/<user>/<session>.zip`
/// and remove the original.
pub fn archive_workspace(
    layout: &WorkspaceLayout,
    user_id: &str,
    session_id: &str,
) -> Result<PathBuf> {
    let session_dir = layout.session_dir(user_id, session_id)?;
    if !session_dir.is_dir() {
        return Err(Error::new(
            ErrorKind::WorkspaceArchiveFailed,
            format!("No workspace for session {session_id}"),
        ));
    }

    let archive_dir = layout.root().join("_archives").join(user_id);
    std::fs::create_dir_all(&archive_dir)
        .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))?;
    let archive_path = archive_dir.join(format!("{session_id}.zip"));

    let file = std::fs::File::create(&archive_path)
        .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for entry in WalkDir::new(&session_dir).follow_links(false).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(&session_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        writer
            .start_file(rel, options)
            .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))?;
        let mut source = std::fs::File::open(entry.path())
            .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))?;
        std::io::copy(&mut source, &mut writer)
            .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))?;
    }
    writer
        .finish()
        .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))?;

    std::fs::remove_dir_all(&session_dir)
        .map_err(|e| Error::new(ErrorKind::WorkspaceArchiveFailed, e.to_string()))?;
    info!(user_id, session_id, archive = %archive_path.display(), "workspace archived");
    Ok(archive_path)
}

/// Delete a session workspace. Without `force`, a missing workspace is
/// an error; with it, deletion is idempotent.
pub fn delete_workspace(
    layout: &WorkspaceLayout,
    user_id: &str,
    session_id: &str,
    force: bool,
) -> Result<()> {
    let session_dir = layout.session_dir(user_id, session_id)?;
    if !session_dir.is_dir() {
        if force {
            return Ok(());
        }
        return Err(Error::new(
            ErrorKind::WorkspaceDeleteFailed,
            format!("No workspace for session {session_id}"),
        ));
    }
    std::fs::remove_dir_all(&session_dir)
        .map_err(|e| Error::new(ErrorKind::WorkspaceDeleteFailed, e.to_string()))?;
    info!(user_id, session_id, "workspace deleted");
    Ok(())
}

/// Local file tree of a session workspace (no presigned URLs).
pub fn list_workspace_files(
    layout: &WorkspaceLayout,
    policy: &IgnorePolicy,
    user_id: &str,
    session_id: &str,
) -> Result<Vec<FileNode>> {
    let workspace = layout.workspace_dir(user_id, session_id)?;
    if !workspace.is_dir() {
        return Ok(Vec::new());
    }
    let walked = collect_workspace_files(&workspace, policy)
        .map_err(|e| Error::external(format!("workspace walk failed: {e}")))?;
    let files: Vec<ManifestFile> = walked
        .iter()
        .filter_map(|entry| {
            ManifestFile::from_value(&json!({
                "path": format!("/{}", entry.rel_path),
                "size": entry.size,
                "mimeType": entry.mime_type,
                "sha256": entry.sha256,
            }))
        })
        .collect();
    Ok(build_tree_from_files(&files))
}

/// Remove session workspaces whose last modification is older than
/// `max_age`. Returns the number of sessions removed.
pub fn cleanup_idle(layout: &WorkspaceLayout, max_age: std::time::Duration) -> usize {
    let cutoff = std::time::SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let mut removed = 0usize;
    let Ok(users) = std::fs::read_dir(layout.root()) else {
        return 0;
    };
    for user in users.flatten() {
        if !user.path().is_dir() {
            continue;
        }
        let Ok(sessions) = std::fs::read_dir(user.path()) else {
            continue;
        };
        for session in sessions.flatten() {
            let path = session.path();
            if !path.is_dir() {
                continue;
            }
            let idle = path
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| modified < cutoff)
                .unwrap_or(false);
            if idle && std::fs::remove_dir_all(&path).is_ok() {
                info!(path = %path.display(), "idle workspace removed");
                removed += 1;
            }
        }
    }
    removed
}

/// Resolve one workspace file for serving; `None` for any path that is
/// missing or would escape the workspace.
#[must_use]
pub fn resolve_workspace_file(
    layout: &WorkspaceLayout,
    user_id: &str,
    session_id: &str,
    path: &str,
) -> Option<PathBuf> {
    let workspace = layout.workspace_dir(user_id, session_id).ok()?;
    let resolved = safe_join(&workspace, path).ok()?;
    if resolved.is_file() { Some(resolved) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (WorkspaceLayout, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(tmp.path());
        let workspace = layout.ensure_workspace("u1", "s1").unwrap();
        std::fs::write(workspace.join("notes.md"), b"hello").unwrap();
        (layout, tmp)
    }

    #[test]
    fn stats_expose_ignore_policy() {
        let (layout, _tmp) = fixture();
        let stats = disk_usage(&layout, &IgnorePolicy::default());
        assert_eq!(stats["user_count"], 1);
        assert_eq!(stats["session_count"], 1);
        assert!(stats["export_ignore"]["names"].as_array().unwrap().len() >= 4);
    }

    #[test]
    fn archive_removes_original() {
        let (layout, _tmp) = fixture();
        let archive = archive_workspace(&layout, "u1", "s1").unwrap();
        assert!(archive.is_file());
        assert!(!layout.session_dir("u1", "s1").unwrap().exists());
        assert_eq!(user_workspaces(&layout, "u1").len(), 0);
    }

    #[test]
    fn delete_respects_force() {
        let (layout, _tmp) = fixture();
        delete_workspace(&layout, "u1", "s1", false).unwrap();
        let err = delete_workspace(&layout, "u1", "s1", false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::WorkspaceDeleteFailed);
        delete_workspace(&layout, "u1", "s1", true).unwrap();
    }

    #[test]
    fn file_resolution_is_traversal_safe() {
        let (layout, _tmp) = fixture();
        assert!(resolve_workspace_file(&layout, "u1", "s1", "notes.md").is_some());
        assert!(resolve_workspace_file(&layout, "u1", "s1", "../s1/notes.md").is_none());
        assert!(resolve_workspace_file(&layout, "u1", "s1", "/etc/passwd").is_none());
        assert!(resolve_workspace_file(&layout, "u1", "s1", "missing.md").is_none());
    }

    #[test]
    fn local_tree_lists_files() {
        let (layout, _tmp) = fixture();
        let nodes =
            list_workspace_files(&layout, &IgnorePolicy::default(), "u1", "s1").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "notes.md");
    }
}
