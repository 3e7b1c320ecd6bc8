// SPDX-License-Identifier: MIT OR Apache-2.0
//! UI file-tree construction from manifests.

use crate::manifest::{ManifestFile, extract_manifest_files};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Node kind in the UI file tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A regular file.
    File,
    /// A directory.
    Folder,
}

/// One node of the UI file tree served over the API and WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    /// Stable node id (the path).
    pub id: String,
    /// Display name (last path component).
    pub name: String,
    /// File or folder.
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Normalized path with a leading slash.
    pub path: String,
    /// Children, for folders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
    /// Presigned GET URL, for files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// MIME type, for files.
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Upload state passthrough.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oss_status: Option<String>,
    /// Object metadata passthrough.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oss_meta: Option<Value>,
}

enum TreeEntry {
    File(FileNode),
    Folder {
        path: String,
        children: BTreeMap<String, TreeEntry>,
    },
}

fn insert_file(root: &mut BTreeMap<String, TreeEntry>, file: &ManifestFile, path: &str) {
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let mut current = root;
    for (index, part) in parts.iter().enumerate() {
        if index == parts.len() - 1 {
            current.insert(
                (*part).to_string(),
                TreeEntry::File(FileNode {
                    id: path.to_string(),
                    name: (*part).to_string(),
                    kind: NodeKind::File,
                    path: path.to_string(),
                    children: None,
                    url: None,
                    mime_type: file.mime_type.clone(),
                    oss_status: file.status.clone(),
                    oss_meta: file.oss_meta(),
                }),
            );
            return;
        }
        let folder_path = format!("/{}", parts[..=index].join("/"));
        let entry = current
            .entry((*part).to_string())
            .or_insert_with(|| TreeEntry::Folder {
                path: folder_path,
                children: BTreeMap::new(),
            });
        match entry {
            TreeEntry::Folder { children, .. } => current = children,
            // A file already occupies this name; the manifest is
            // inconsistent and the deeper entry is dropped.
            TreeEntry::File(_) => return,
        }
    }
}

fn entries_to_nodes(entries: BTreeMap<String, TreeEntry>) -> Vec<FileNode> {
    let mut nodes: Vec<FileNode> = entries
        .into_iter()
        .map(|(name, entry)| match entry {
            TreeEntry::File(node) => node,
            TreeEntry::Folder { path, children } => FileNode {
                id: path.clone(),
                name,
                kind: NodeKind::Folder,
                path,
                children: Some(entries_to_nodes(children)),
                url: None,
                mime_type: None,
                oss_status: None,
                oss_meta: None,
            },
        })
        .collect();
    // Folders first, then case-insensitive by name.
    nodes.sort_by(|a, b| {
        let rank = |n: &FileNode| if n.kind == NodeKind::Folder { 0 } else { 1 };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    nodes
}

/// Assemble a sorted tree from flat manifest file entries. Entries
/// without a normalized path are skipped.
#[must_use]
pub fn build_tree_from_files(files: &[ManifestFile]) -> Vec<FileNode> {
    let mut root = BTreeMap::new();
    for file in files {
        if let Some(path) = &file.path {
            insert_file(&mut root, file, path);
        }
    }
    entries_to_nodes(root)
}

fn node_from_value(value: &Value) -> Option<FileNode> {
    let map = value.as_object()?;
    let kind = match map.get("type").and_then(Value::as_str) {
        Some("file") => NodeKind::File,
        Some("folder") => NodeKind::Folder,
        _ => return None,
    };
    let path = map.get("path").and_then(Value::as_str).unwrap_or("").to_string();
    let name = map
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| path.rsplit('/').next().unwrap_or("").to_string());
    let children = match kind {
        NodeKind::Folder => map.get("children").and_then(Value::as_array).map(|items| {
            items.iter().filter_map(node_from_value).collect::<Vec<_>>()
        }),
        NodeKind::File => None,
    };
    Some(FileNode {
        id: map
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| path.clone()),
        name,
        kind,
        path,
        children,
        url: None,
        mime_type: map
            .get("mimeType")
            .or_else(|| map.get("mime_type"))
            .and_then(Value::as_str)
            .map(str::to_string),
        oss_status: map
            .get("oss_status")
            .or_else(|| map.get("ossStatus"))
            .and_then(Value::as_str)
            .map(str::to_string),
        oss_meta: map
            .get("oss_meta")
            .or_else(|| map.get("ossMeta"))
            .cloned()
            .filter(|v| !v.is_null()),
    })
}

/// Build UI nodes from any manifest shape: a `{"nodes": ...}` manifest
/// is used as-is, anything else is assembled from its flat file list.
#[must_use]
pub fn build_nodes_from_manifest(manifest: &Value) -> Vec<FileNode> {
    if let Some(nodes) = manifest.get("nodes").and_then(Value::as_array) {
        return nodes.iter().filter_map(node_from_value).collect();
    }
    build_tree_from_files(&extract_manifest_files(manifest))
}

/// All file nodes of a tree, depth-first.
#[must_use]
pub fn flatten_files(nodes: &[FileNode]) -> Vec<&FileNode> {
    let mut out = Vec::new();
    fn visit<'a>(nodes: &'a [FileNode], out: &mut Vec<&'a FileNode>) {
        for node in nodes {
            match node.kind {
                NodeKind::File => out.push(node),
                NodeKind::Folder => {
                    if let Some(children) = &node.children {
                        visit(children, out);
                    }
                }
            }
        }
    }
    visit(nodes, &mut out);
    out
}

/// Attach presigned URLs to every file node using `build_url`.
pub fn attach_file_urls(nodes: &mut [FileNode], build_url: &dyn Fn(&str) -> Option<String>) {
    for node in nodes {
        match node.kind {
            NodeKind::File => {
                if !node.path.is_empty() {
                    node.url = build_url(&node.path);
                }
            }
            NodeKind::Folder => {
                if let Some(children) = node.children.as_mut() {
                    attach_file_urls(children, build_url);
                }
            }
        }
    }
}
