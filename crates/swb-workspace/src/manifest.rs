// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workspace manifest parsing.
//!
//! A manifest is blob-resident JSON in one of three accepted shapes: a
//! pre-built tree `{"nodes": [...]}`, a flat listing `{"files": [...]}`,
//! or a bare array of file entries. Entries are parsed leniently; the
//! original JSON of each entry is retained for metadata passthrough.

use crate::path::normalize_path;
use serde_json::{Map, Value};

/// One file entry extracted from a manifest.
#[derive(Debug, Clone)]
pub struct ManifestFile {
    /// Normalized path (`/a/b/c`), when the entry had a usable one.
    pub path: Option<String>,
    /// Object key under any of the accepted aliases.
    pub key: Option<String>,
    /// MIME type (`mimeType` or `mime_type`).
    pub mime_type: Option<String>,
    /// Upload state (`status` or `oss_status`).
    pub status: Option<String>,
    /// File size in bytes.
    pub size: Option<u64>,
    /// Hex-encoded SHA-256 of the content.
    pub sha256: Option<String>,
    /// The raw entry, for metadata passthrough.
    pub raw: Value,
}

fn str_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

impl ManifestFile {
    /// Parse a file entry from a manifest object. Returns `None` for
    /// non-object values.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        Some(Self {
            path: map
                .get("path")
                .and_then(Value::as_str)
                .and_then(normalize_path),
            key: str_field(map, &["key", "object_key", "oss_key", "s3_key"]),
            mime_type: str_field(map, &["mimeType", "mime_type"]),
            status: str_field(map, &["status", "oss_status"]),
            size: map.get("size").and_then(Value::as_u64),
            sha256: map.get("sha256").and_then(Value::as_str).map(str::to_string),
            raw: value.clone(),
        })
    }

    /// Object key for this entry, falling back to `<prefix>/<path>` when
    /// the entry carries none.
    #[must_use]
    pub fn object_key(&self, files_prefix: Option<&str>) -> Option<String> {
        if let Some(key) = &self.key {
            return Some(key.clone());
        }
        let prefix = files_prefix?.trim_end_matches('/');
        if prefix.is_empty() {
            return None;
        }
        let path = self.path.as_deref()?;
        Some(format!("{prefix}/{}", path.trim_start_matches('/')))
    }

    /// Metadata subset surfaced to the UI (`key`, `etag`, `size`,
    /// `last_modified`, `sha256`, `md5`), or `None` when empty.
    #[must_use]
    pub fn oss_meta(&self) -> Option<Value> {
        let map = self.raw.as_object()?;
        let mut meta = Map::new();
        for field in ["key", "etag", "size", "last_modified", "sha256", "md5"] {
            if let Some(value) = map.get(field) {
                if !value.is_null() {
                    meta.insert(field.to_string(), value.clone());
                }
            }
        }
        if meta.is_empty() { None } else { Some(Value::Object(meta)) }
    }
}

fn flatten_tree_files(nodes: &[Value], out: &mut Vec<ManifestFile>) {
    for node in nodes {
        let Some(map) = node.as_object() else { continue };
        match map.get("type").and_then(Value::as_str) {
            Some("file") => {
                if let Some(file) = ManifestFile::from_value(node) {
                    out.push(file);
                }
            }
            Some("folder") => {
                if let Some(children) = map.get("children").and_then(Value::as_array) {
                    flatten_tree_files(children, out);
                }
            }
            _ => {}
        }
    }
}

/// Extract the flat file list from any accepted manifest shape.
#[must_use]
pub fn extract_manifest_files(manifest: &Value) -> Vec<ManifestFile> {
    if let Some(map) = manifest.as_object() {
        if let Some(files) = map.get("files").and_then(Value::as_array) {
            return files.iter().filter_map(ManifestFile::from_value).collect();
        }
        if let Some(nodes) = map.get("nodes").and_then(Value::as_array) {
            let mut out = Vec::new();
            flatten_tree_files(nodes, &mut out);
            return out;
        }
    }
    if let Some(list) = manifest.as_array() {
        return list.iter().filter_map(ManifestFile::from_value).collect();
    }
    Vec::new()
}

/// Find the entry whose normalized path equals `path`.
#[must_use]
pub fn find_manifest_file(manifest: &Value, path: &str) -> Option<ManifestFile> {
    let wanted = normalize_path(path)?;
    extract_manifest_files(manifest)
        .into_iter()
        .find(|file| file.path.as_deref() == Some(wanted.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_shape_with_key_aliases() {
        let manifest = json!({"files": [
            {"path": "a/b.txt", "s3_key": "sessions/s/files/a/b.txt", "mime_type": "text/plain"},
            {"path": "../bad", "key": "x"},
            "not-an-object"
        ]});
        let files = extract_manifest_files(&manifest);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path.as_deref(), Some("/a/b.txt"));
        assert_eq!(files[0].key.as_deref(), Some("sessions/s/files/a/b.txt"));
        assert_eq!(files[0].mime_type.as_deref(), Some("text/plain"));
        assert_eq!(files[1].path, None);
    }

    #[test]
    fn tree_shape_is_flattened() {
        let manifest = json!({"nodes": [
            {"type": "folder", "name": "src", "path": "/src", "children": [
                {"type": "file", "name": "main.rs", "path": "/src/main.rs"}
            ]},
            {"type": "file", "name": "README.md", "path": "/README.md"}
        ]});
        let files = extract_manifest_files(&manifest);
        let paths: Vec<_> = files.iter().filter_map(|f| f.path.as_deref()).collect();
        assert_eq!(paths, vec!["/src/main.rs", "/README.md"]);
    }

    #[test]
    fn object_key_falls_back_to_prefix() {
        let file = ManifestFile::from_value(&json!({"path": "a/b.txt"})).unwrap();
        assert_eq!(
            file.object_key(Some("sessions/s1/files/")).as_deref(),
            Some("sessions/s1/files/a/b.txt")
        );
        assert_eq!(file.object_key(None), None);
    }

    #[test]
    fn find_matches_normalized_path() {
        let manifest = json!({"files": [{"path": "/docs/readme.md", "key": "k1"}]});
        let found = find_manifest_file(&manifest, "docs//readme.md").unwrap();
        assert_eq!(found.key.as_deref(), Some("k1"));
        assert!(find_manifest_file(&manifest, "../docs/readme.md").is_none());
    }
}
