// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for path normalization, the ignore policy, and
//! manifest tree round-trips.

use proptest::prelude::*;
use serde_json::json;
use std::path::Path;
use swb_workspace::{
    IgnorePolicy, build_nodes_from_manifest, extract_manifest_files, flatten_files,
    normalize_path, safe_join,
};

proptest! {
    // P8: normalization is idempotent over arbitrary input.
    #[test]
    fn normalize_is_idempotent(raw in ".{0,64}") {
        if let Some(once) = normalize_path(&raw) {
            prop_assert_eq!(normalize_path(&once), Some(once.clone()));
        }
    }

    // P4: normalized output never contains dot segments or empty parts
    // and always carries a leading slash.
    #[test]
    fn normalized_paths_are_canonical(raw in ".{0,64}") {
        if let Some(normalized) = normalize_path(&raw) {
            prop_assert!(normalized.starts_with('/'));
            for part in normalized.split('/').skip(1) {
                prop_assert!(!part.is_empty());
                prop_assert!(part != "." && part != "..");
            }
        }
    }

    // P4: safe_join output always stays under the base directory.
    #[test]
    fn safe_join_never_escapes(raw in ".{1,64}") {
        let base = Path::new("/srv/workspace");
        if let Ok(joined) = safe_join(base, &raw) {
            prop_assert!(joined.starts_with(base));
            prop_assert!(!joined
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir)));
        }
    }

    // P4: the ignore policy never admits a path it cannot normalize.
    #[test]
    fn policy_rejects_unnormalizable(raw in ".{0,64}") {
        let policy = IgnorePolicy::default();
        if normalize_path(&raw).is_none() {
            prop_assert!(!policy.allows_path(&raw));
        }
    }

    // P8: build_tree → flatten recovers exactly the normalizable,
    // deduplicated file set.
    #[test]
    fn tree_roundtrip_preserves_files(
        segments in proptest::collection::vec(
            proptest::collection::vec("[a-z]{1,6}", 1..4),
            1..12,
        )
    ) {
        let mut paths: Vec<String> = segments
            .iter()
            .map(|parts| format!("/{}", parts.join("/")))
            .collect();
        paths.sort();
        paths.dedup();
        // A path that is a prefix-directory of another cannot be both a
        // file and a folder; drop such collisions up front.
        let paths: Vec<String> = paths
            .iter()
            .filter(|p| !paths.iter().any(|q| *q != **p && q.starts_with(&format!("{p}/"))))
            .cloned()
            .collect();

        let manifest = json!({
            "files": paths.iter().map(|p| json!({"path": p})).collect::<Vec<_>>()
        });
        let nodes = build_nodes_from_manifest(&manifest);
        let mut recovered: Vec<String> = flatten_files(&nodes)
            .iter()
            .map(|node| node.path.clone())
            .collect();
        recovered.sort();
        let mut expected = paths.clone();
        expected.sort();
        prop_assert_eq!(recovered, expected);
    }
}

#[test]
fn manifest_shapes_agree() {
    // The same logical content through the flat and tree shapes yields
    // the same file set.
    let flat = json!({"files": [
        {"path": "/a/b.txt", "key": "k1"},
        {"path": "/c.txt", "key": "k2"}
    ]});
    let tree = json!({"nodes": [
        {"type": "folder", "name": "a", "path": "/a", "children": [
            {"type": "file", "name": "b.txt", "path": "/a/b.txt", "key": "k1"}
        ]},
        {"type": "file", "name": "c.txt", "path": "/c.txt", "key": "k2"}
    ]});

    let mut from_flat: Vec<String> = extract_manifest_files(&flat)
        .into_iter()
        .filter_map(|f| f.path)
        .collect();
    let mut from_tree: Vec<String> = extract_manifest_files(&tree)
        .into_iter()
        .filter_map(|f| f.path)
        .collect();
    from_flat.sort();
    from_tree.sort();
    assert_eq!(from_flat, from_tree);
}

#[test]
fn sibling_order_is_folders_first_then_name() {
    let manifest = json!({"files": [
        {"path": "/zebra.txt"},
        {"path": "/Alpha.txt"},
        {"path": "/beta/inner.txt"}
    ]});
    let nodes = build_nodes_from_manifest(&manifest);
    let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["beta", "Alpha.txt", "zebra.txt"]);
}
