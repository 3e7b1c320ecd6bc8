// SPDX-License-Identifier: MIT OR Apache-2.0
//! Export file walk: enumerate workspace files with size, hash, and
//! guessed MIME type, honoring the ignore policy.

use crate::ignore::IgnorePolicy;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One exportable workspace file.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    /// Path relative to the workspace root, forward slashes, no leading
    /// slash.
    pub rel_path: String,
    /// Absolute path on disk.
    pub abs_path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Hex-encoded SHA-256 of the content.
    pub sha256: String,
    /// MIME type guessed from the extension.
    pub mime_type: Option<String>,
}

/// Walk `root` and collect every file the policy allows, sorted by
/// relative path. Symlinks are not followed.
pub fn collect_workspace_files(root: &Path, policy: &IgnorePolicy) -> Result<Vec<WalkedFile>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        entry
            .file_name()
            .to_str()
            .is_some_and(|name| policy.allows_component(name))
    });

    for entry in walker {
        let entry = entry.context("walk workspace")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let abs = entry.path();
        let rel = abs
            .strip_prefix(root)
            .unwrap_or(abs)
            .to_string_lossy()
            .replace('\\', "/");
        if rel.is_empty() || !policy.allows_path(&rel) {
            continue;
        }

        let content = fs::read(abs).with_context(|| format!("read {}", abs.display()))?;
        let mut hasher = Sha256::new();
        hasher.update(&content);
        let sha256 = format!("{:x}", hasher.finalize());

        files.push(WalkedFile {
            rel_path: rel,
            abs_path: abs.to_path_buf(),
            size: content.len() as u64,
            sha256,
            mime_type: mime_guess::from_path(abs).first_raw().map(str::to_string),
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_honors_ignore_policy() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("src/main.rs"), b"fn main() {}").unwrap();
        fs::write(root.join(".git/HEAD"), b"ref").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), b"x").unwrap();
        fs::write(root.join(".hidden"), b"x").unwrap();
        fs::write(root.join("report.md"), b"# hi").unwrap();

        let files = collect_workspace_files(root, &IgnorePolicy::default()).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["report.md", "src/main.rs"]);
    }

    #[test]
    fn walk_records_size_hash_and_mime() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"hello").unwrap();

        let files = collect_workspace_files(tmp.path(), &IgnorePolicy::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 5);
        assert_eq!(
            files[0].sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(files[0].mime_type.as_deref(), Some("text/plain"));
    }
}
