// SPDX-License-Identifier: MIT OR Apache-2.0
//! Export/state-patch ignore policy.

use crate::path::normalize_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Directory/file names excluded from workspace export and state-patch
/// file changes, plus a flag excluding dot-files wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnorePolicy {
    /// Exact component names to exclude.
    pub names: BTreeSet<String>,
    /// Whether any component starting with `.` is excluded.
    pub ignore_dotfiles: bool,
}

impl Default for IgnorePolicy {
    fn default() -> Self {
        let names = [".git", "node_modules", "__pycache__", ".venv", ".claude_data", "target"]
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            names,
            ignore_dotfiles: true,
        }
    }
}

impl IgnorePolicy {
    /// Whether a single path component passes the policy.
    #[must_use]
    pub fn allows_component(&self, name: &str) -> bool {
        if self.names.contains(name) {
            return false;
        }
        if self.ignore_dotfiles && name.starts_with('.') {
            return false;
        }
        true
    }

    /// Whether every component of `path` (any separator style) passes.
    /// Paths that fail normalization are not allowed.
    #[must_use]
    pub fn allows_path(&self, path: &str) -> bool {
        let Some(normalized) = normalize_path(path) else {
            return false;
        };
        normalized
            .split('/')
            .filter(|p| !p.is_empty())
            .all(|part| self.allows_component(part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_blocks_common_noise() {
        let policy = IgnorePolicy::default();
        assert!(!policy.allows_path("node_modules/pkg/index.js"));
        assert!(!policy.allows_path(".git/HEAD"));
        assert!(!policy.allows_path("src/__pycache__/x.pyc"));
        assert!(!policy.allows_path(".env"));
        assert!(policy.allows_path("src/main.rs"));
    }

    #[test]
    fn dotfile_flag_is_honored() {
        let mut policy = IgnorePolicy::default();
        policy.ignore_dotfiles = false;
        assert!(policy.allows_path(".env"));
        assert!(!policy.allows_path(".git/config"));
    }

    #[test]
    fn malformed_paths_are_not_allowed() {
        let policy = IgnorePolicy::default();
        assert!(!policy.allows_path("../outside"));
        assert!(!policy.allows_path(""));
    }
}
