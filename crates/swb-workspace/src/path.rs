// SPDX-License-Identifier: MIT OR Apache-2.0
//! Path normalization and traversal-safe joins.

use std::path::{Component, Path, PathBuf};

/// Errors from [`safe_join`].
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// The relative path was absolute.
    #[error("path is absolute: {0}")]
    Absolute(String),
    /// The relative path contained a parent-directory segment.
    #[error("path escapes its root: {0}")]
    Escapes(String),
    /// The path was empty after normalization.
    #[error("path is empty")]
    Empty,
}

/// Normalize a manifest/workspace path to the canonical `/a/b/c` form.
///
/// Backslashes become slashes, surrounding whitespace is trimmed, empty
/// segments are collapsed, and the result always carries a single
/// leading slash. Returns `None` for empty paths and for any path
/// containing `.` or `..` segments, which never address a workspace
/// file.
#[must_use]
pub fn normalize_path(raw: &str) -> Option<String> {
    let cleaned = raw.replace('\\', "/");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    let parts: Vec<&str> = cleaned.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() || parts.iter().any(|p| *p == "." || *p == "..") {
        return None;
    }
    Some(format!("/{}", parts.join("/")))
}

/// Join `relative` onto `base`, refusing anything that could escape.
///
/// Rejects absolute paths and `..` segments; single-dot and empty
/// segments are collapsed. The result is always strictly inside `base`.
pub fn safe_join(base: &Path, relative: &str) -> Result<PathBuf, PathError> {
    let cleaned = relative.replace('\\', "/");
    let candidate = Path::new(&cleaned);
    if candidate.is_absolute() {
        return Err(PathError::Absolute(relative.to_string()));
    }

    let mut joined = base.to_path_buf();
    let mut pushed = 0usize;
    for component in candidate.components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                pushed += 1;
            }
            Component::CurDir => {}
            _ => return Err(PathError::Escapes(relative.to_string())),
        }
    }
    if pushed == 0 {
        return Err(PathError::Empty);
    }
    Ok(joined)
}

/// Whether `name` is acceptable as a single staged directory or file
/// component: non-empty, only `[A-Za-z0-9._-]`, and not `.`/`..`.
#[must_use]
pub fn is_valid_component_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators_and_leading_slash() {
        assert_eq!(normalize_path("a\\b\\c").as_deref(), Some("/a/b/c"));
        assert_eq!(normalize_path("  /a//b/ ").as_deref(), Some("/a/b"));
        assert_eq!(normalize_path("/a/b/c").as_deref(), Some("/a/b/c"));
    }

    #[test]
    fn rejects_dot_segments() {
        assert_eq!(normalize_path("a/../b"), None);
        assert_eq!(normalize_path("./a"), None);
        assert_eq!(normalize_path(".."), None);
        assert_eq!(normalize_path(""), None);
        assert_eq!(normalize_path("   "), None);
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["a/b", "/a//b/", "x\\y", "deep/tree/file.txt"] {
            let once = normalize_path(raw).unwrap();
            assert_eq!(normalize_path(&once).as_deref(), Some(once.as_str()));
        }
    }

    #[test]
    fn safe_join_refuses_escapes() {
        let base = Path::new("/srv/ws");
        assert!(safe_join(base, "../etc/passwd").is_err());
        assert!(safe_join(base, "/etc/passwd").is_err());
        assert!(safe_join(base, "").is_err());
        assert_eq!(
            safe_join(base, "a/./b.txt").unwrap(),
            Path::new("/srv/ws/a/b.txt")
        );
    }

    #[test]
    fn component_name_rules() {
        assert!(is_valid_component_name("my-skill_1.2"));
        assert!(!is_valid_component_name(".."));
        assert!(!is_valid_component_name("."));
        assert!(!is_valid_component_name("a/b"));
        assert!(!is_valid_component_name("spaced name"));
        assert!(!is_valid_component_name(""));
    }
}
