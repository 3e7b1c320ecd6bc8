// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory [`BlobStore`] used by tests and single-node development.

use crate::{BlobStore, PresignOptions};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use swb_error::{Error, Result};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: Option<String>,
}

/// An in-memory object store. Presigned URLs are synthetic
/// (`memory://`-scheme) but carry the disposition/type query params so
/// assertions can see them.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Content type recorded for `key`, if the object exists.
    pub async fn content_type_of(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(key)
            .and_then(|o| o.content_type.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: Option<&str>) -> Result<()> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn upload_file(&self, path: &Path, key: &str, content_type: Option<&str>) -> Result<()> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| Error::external(format!("read {}: {e}", path.display())))?;
        self.put_object(key, body, content_type).await
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| Error::external(format!("object not found: {key}")))
    }

    async fn download_file(&self, key: &str, destination: &Path) -> Result<()> {
        let body = self.get_object(key).await?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::external(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(destination, body)
            .await
            .map_err(|e| Error::external(format!("write {}: {e}", destination.display())))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn presign_get(&self, key: &str, options: &PresignOptions) -> Result<String> {
        if !self.objects.read().await.contains_key(key) {
            return Err(Error::external(format!("object not found: {key}")));
        }
        let mut url = format!("memory://bucket/{key}");
        let mut sep = '?';
        if let Some(disposition) = &options.content_disposition {
            url.push(sep);
            url.push_str(&format!("response-content-disposition={disposition}"));
            sep = '&';
        }
        if let Some(content_type) = &options.content_type {
            url.push(sep);
            url.push_str(&format!("response-content-type={content_type}"));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_roundtrip_with_content_type() {
        let store = MemoryStore::new();
        store
            .put_object("a/b.txt", b"hello".to_vec(), Some("text/plain"))
            .await
            .unwrap();
        assert_eq!(store.get_object("a/b.txt").await.unwrap(), b"hello");
        assert_eq!(
            store.content_type_of("a/b.txt").await.as_deref(),
            Some("text/plain")
        );
    }

    #[tokio::test]
    async fn presign_carries_inline_disposition() {
        let store = MemoryStore::new();
        store.put_object("k", vec![1], None).await.unwrap();
        let url = store
            .presign_get("k", &PresignOptions::inline(Some("image/png".into())))
            .await
            .unwrap();
        assert!(url.contains("response-content-disposition=inline"));
        assert!(url.contains("response-content-type=image/png"));
    }

    #[tokio::test]
    async fn missing_object_errors() {
        let store = MemoryStore::new();
        assert!(store.get_object("missing").await.is_err());
        assert!(
            store
                .presign_get("missing", &PresignOptions::default())
                .await
                .is_err()
        );
    }
}
