// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workspace path handling shared by staging, export, and the UI file
//! tree: normalization that never lets a path escape its root, the
//! export ignore policy, manifest parsing, and tree building.
#![deny(unsafe_code)]

pub mod ignore;
pub mod manifest;
pub mod path;
pub mod tree;
pub mod walk;

pub use ignore::IgnorePolicy;
pub use manifest::{ManifestFile, extract_manifest_files, find_manifest_file};
pub use path::{is_valid_component_name, normalize_path, safe_join};
pub use tree::{
    FileNode, NodeKind, attach_file_urls, build_nodes_from_manifest, build_tree_from_files,
    flatten_files,
};
pub use walk::{WalkedFile, collect_workspace_files};
