// SPDX-License-Identifier: MIT OR Apache-2.0
//! Blob store seam.
//!
//! The platform takes no opinion on which object store backs it; every
//! consumer goes through [`BlobStore`]. [`MemoryStore`] backs tests and
//! single-node development. Object-key layout helpers live in [`keys`].
#![deny(unsafe_code)]

pub mod config;
pub mod keys;
pub mod memory;

pub use config::ObjectStoreConfig;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use swb_error::{Error, Result};
use swb_workspace::safe_join;

/// Options for presigned GET URLs.
#[derive(Debug, Clone, Default)]
pub struct PresignOptions {
    /// `response-content-disposition` override (e.g. `inline`).
    pub content_disposition: Option<String>,
    /// `response-content-type` override.
    pub content_type: Option<String>,
}

impl PresignOptions {
    /// Inline disposition with the given MIME type, the shape used for
    /// UI file previews.
    #[must_use]
    pub fn inline(content_type: Option<String>) -> Self {
        Self {
            content_disposition: Some("inline".to_string()),
            content_type,
        }
    }
}

/// Narrow object-store interface used by staging, export, and the file
/// tree builders.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload raw bytes under `key`.
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: Option<&str>) -> Result<()>;

    /// Upload a file from disk under `key`.
    async fn upload_file(&self, path: &Path, key: &str, content_type: Option<&str>) -> Result<()>;

    /// Fetch the object at `key`.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    /// Download the object at `key` to `destination`, creating parent
    /// directories.
    async fn download_file(&self, key: &str, destination: &Path) -> Result<()>;

    /// List all keys under `prefix`.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;

    /// Produce a time-limited GET URL for `key`.
    async fn presign_get(&self, key: &str, options: &PresignOptions) -> Result<String>;

    /// Download every object under `prefix` into `destination_dir`,
    /// preserving the relative layout. Keys whose relative part is
    /// absolute or contains `..` are rejected rather than written.
    async fn download_prefix(&self, prefix: &str, destination_dir: &Path) -> Result<()> {
        for key in self.list_objects(prefix).await? {
            if key.ends_with('/') {
                continue;
            }
            let relative = key[prefix.len().min(key.len())..].trim_start_matches('/');
            if relative.is_empty() {
                continue;
            }
            let target = safe_join(destination_dir, relative).map_err(|e| {
                Error::external(format!("invalid object key path: {e}"))
                    .with_details(serde_json::json!({"key": key}))
            })?;
            self.download_file(&key, &target).await?;
        }
        Ok(())
    }

    /// Fetch and parse a manifest JSON object.
    async fn get_manifest(&self, key: &str) -> Result<Value> {
        let bytes = self.get_object(key).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            Error::external(format!("manifest is not valid JSON: {e}"))
                .with_details(serde_json::json!({"key": key}))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn download_prefix_refuses_traversal_keys() {
        let store = MemoryStore::new();
        store
            .put_object("skills/u1/s/../../evil", b"x".to_vec(), None)
            .await
            .unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let err = store
            .download_prefix("skills/u1/s/", tmp.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind, swb_error::ErrorKind::ExternalServiceError);
    }

    #[tokio::test]
    async fn download_prefix_preserves_layout() {
        let store = MemoryStore::new();
        store
            .put_object("skills/u1/web/SKILL.md", b"# skill".to_vec(), None)
            .await
            .unwrap();
        store
            .put_object("skills/u1/web/ref/notes.md", b"notes".to_vec(), None)
            .await
            .unwrap();

        let tmp = tempfile::tempdir().unwrap();
        store.download_prefix("skills/u1/web", tmp.path()).await.unwrap();
        assert_eq!(
            std::fs::read(tmp.path().join("SKILL.md")).unwrap(),
            b"# skill"
        );
        assert_eq!(
            std::fs::read(tmp.path().join("ref/notes.md")).unwrap(),
            b"notes"
        );
    }
}
