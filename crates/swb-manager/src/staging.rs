// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pre-dispatch staging: skill trees, user attachments, and slash
//! commands are materialized from the blob store into the session
//! workspace the executor mounts.
//!
//! Layout inside a session workspace:
//!
//! ```text
//! <workspace>/.claude_data/skills/<name>/...
//! <workspace>/.claude_data/commands/<name>.md
//! <workspace>/inputs/...
//! ```

use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use swb_error::{Error, ErrorKind, Result};
use swb_store::BlobStore;
use swb_workspace::{is_valid_component_name, safe_join};
use tracing::{info, warn};

/// Local workspace layout: `<root>/<user_id>/<session_id>/workspace`.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    /// Layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The layout root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checked_component<'a>(value: &'a str, what: &str) -> Result<&'a str> {
        if is_valid_component_name(value) {
            Ok(value)
        } else {
            Err(Error::bad_request(format!("Invalid {what}: {value}")))
        }
    }

    /// A user's directory (`<root>/<user>`).
    pub fn user_dir(&self, user_id: &str) -> Result<PathBuf> {
        let user = Self::checked_component(user_id, "user id")?;
        Ok(self.root.join(user))
    }

    /// Session directory (`<root>/<user>/<session>`).
    pub fn session_dir(&self, user_id: &str, session_id: &str) -> Result<PathBuf> {
        let session = Self::checked_component(session_id, "session id")?;
        Ok(self.user_dir(user_id)?.join(session))
    }

    /// Workspace directory for a session, created on demand.
    pub fn ensure_workspace(&self, user_id: &str, session_id: &str) -> Result<PathBuf> {
        let dir = self.session_dir(user_id, session_id)?.join("workspace");
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::external(format!("create workspace {}: {e}", dir.display())))?;
        Ok(dir)
    }

    /// Workspace directory for a session without creating it.
    pub fn workspace_dir(&self, user_id: &str, session_id: &str) -> Result<PathBuf> {
        Ok(self.session_dir(user_id, session_id)?.join("workspace"))
    }

    /// Locate a session's directory when only the session id is known.
    #[must_use]
    pub fn find_session_dir(&self, session_id: &str) -> Option<PathBuf> {
        if !is_valid_component_name(session_id) {
            return None;
        }
        let users = std::fs::read_dir(&self.root).ok()?;
        for user in users.flatten() {
            let candidate = user.path().join(session_id);
            if candidate.is_dir() {
                return Some(candidate);
            }
        }
        None
    }
}

fn remove_stale_dirs(root: &Path, keep: &BTreeSet<String>) -> usize {
    let Ok(entries) = std::fs::read_dir(root) else {
        return 0;
    };
    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_symlink = path.symlink_metadata().map(|m| m.file_type().is_symlink()).unwrap_or(false);
        if !path.is_dir() || is_symlink {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if keep.contains(name) {
            continue;
        }
        if std::fs::remove_dir_all(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}

fn entry_object_key(entry: &Map<String, Value>) -> Option<String> {
    entry
        .get("s3_key")
        .or_else(|| entry.get("key"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn entry_is_prefix(entry: &Map<String, Value>, key: &str) -> bool {
    entry.get("is_prefix").and_then(Value::as_bool).unwrap_or(false) || key.ends_with('/')
}

/// Stage resolved skill entries into the session workspace.
///
/// Skill names must match `[A-Za-z0-9._-]+`; staged directories whose
/// names are no longer enabled are removed first so a restage converges
/// on exactly the enabled set.
pub async fn stage_skills(
    store: &dyn BlobStore,
    layout: &WorkspaceLayout,
    user_id: &str,
    session_id: &str,
    skills: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    let started_total = Instant::now();
    let workspace = layout.ensure_workspace(user_id, session_id)?;
    let skills_root = workspace.join(".claude_data").join("skills");
    std::fs::create_dir_all(&skills_root)
        .map_err(|e| Error::external(format!("create skills dir: {e}")))?;

    let mut enabled: BTreeSet<String> = BTreeSet::new();
    for (name, spec) in skills {
        let Some(spec) = spec.as_object() else { continue };
        if !is_valid_component_name(name) {
            return Err(Error::bad_request(format!("Invalid skill name: {name}")));
        }
        if spec.get("enabled") != Some(&Value::Bool(false)) {
            enabled.insert(name.clone());
        }
    }

    let removed = remove_stale_dirs(&skills_root, &enabled);

    let mut staged = Map::new();
    for (name, spec) in skills {
        let Some(spec) = spec.as_object() else { continue };
        if spec.get("enabled") == Some(&Value::Bool(false)) {
            staged.insert(name.clone(), json!({"enabled": false}));
            continue;
        }
        let entry = match spec.get("entry") {
            Some(Value::Object(entry)) => entry,
            _ => spec,
        };
        let Some(object_key) = entry_object_key(entry) else {
            continue;
        };
        let target_dir = safe_join(&skills_root, name)
            .map_err(|e| Error::bad_request(format!("Invalid skill path: {e}")))?;
        std::fs::create_dir_all(&target_dir)
            .map_err(|e| Error::external(format!("create skill dir: {e}")))?;

        let step_started = Instant::now();
        let download = if entry_is_prefix(entry, &object_key) {
            store.download_prefix(&object_key, &target_dir).await
        } else {
            let filename = object_key.rsplit('/').next().unwrap_or(object_key.as_str());
            match safe_join(&target_dir, filename) {
                Ok(destination) => store.download_file(&object_key, &destination).await,
                Err(e) => Err(Error::bad_request(format!("Invalid skill file name: {e}"))),
            }
        };
        download.map_err(|e| {
            Error::new(
                ErrorKind::SkillDownloadFailed,
                format!("Failed to stage skill {name}: {e}"),
            )
        })?;
        info!(
            step = "skill_stage_download",
            duration_ms = step_started.elapsed().as_millis() as u64,
            user_id,
            session_id,
            skill_name = %name,
            object_key = %object_key,
            "timing"
        );

        let mut out = spec.clone();
        out.insert("enabled".to_string(), Value::Bool(true));
        out.insert(
            "local_path".to_string(),
            Value::String(target_dir.to_string_lossy().to_string()),
        );
        out.insert("entry".to_string(), Value::Object(entry.clone()));
        staged.insert(name.clone(), Value::Object(out));
    }

    info!(
        step = "skill_stage_total",
        duration_ms = started_total.elapsed().as_millis() as u64,
        user_id,
        session_id,
        skills_requested = skills.len(),
        skills_staged = staged.len(),
        skills_removed = removed,
        "timing"
    );
    Ok(staged)
}

/// Stage user attachments into `<workspace>/inputs/`.
///
/// Entries name a blob key plus a relative destination; absolute or
/// parent-escaping destinations are refused.
pub async fn stage_attachments(
    store: &dyn BlobStore,
    layout: &WorkspaceLayout,
    user_id: &str,
    session_id: &str,
    inputs: &[Value],
) -> Result<Vec<Value>> {
    let started_total = Instant::now();
    if inputs.is_empty() {
        return Ok(Vec::new());
    }
    let workspace = layout.ensure_workspace(user_id, session_id)?;
    let inputs_root = workspace.join("inputs");
    std::fs::create_dir_all(&inputs_root)
        .map_err(|e| Error::external(format!("create inputs dir: {e}")))?;

    let mut staged = Vec::new();
    for input in inputs {
        let Some(entry) = input.as_object() else { continue };
        let Some(object_key) = entry_object_key(entry) else { continue };
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                object_key
                    .rsplit('/')
                    .next()
                    .unwrap_or(object_key.as_str())
                    .to_string()
            });
        let destination = safe_join(&inputs_root, &name)
            .map_err(|e| Error::bad_request(format!("Invalid attachment path: {e}")))?;
        store.download_file(&object_key, &destination).await.map_err(|e| {
            Error::external(format!("Failed to stage attachment {name}: {e}"))
        })?;

        let mut out = entry.clone();
        out.insert(
            "local_path".to_string(),
            Value::String(destination.to_string_lossy().to_string()),
        );
        staged.push(Value::Object(out));
    }

    info!(
        step = "attachment_stage_total",
        duration_ms = started_total.elapsed().as_millis() as u64,
        user_id,
        session_id,
        inputs_staged = staged.len(),
        "timing"
    );
    Ok(staged)
}

fn clean_command_files(commands_root: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(commands_root) else {
        return 0;
    };
    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
    }
    removed
}

/// Stage slash commands as `<name>.md` files, replacing everything
/// staged before.
pub fn stage_slash_commands(
    layout: &WorkspaceLayout,
    user_id: &str,
    session_id: &str,
    commands: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let started_total = Instant::now();
    if commands.is_empty() {
        return Ok(BTreeMap::new());
    }
    let workspace = layout.ensure_workspace(user_id, session_id)?;
    let commands_root = workspace.join(".claude_data").join("commands");
    std::fs::create_dir_all(&commands_root)
        .map_err(|e| Error::external(format!("create commands dir: {e}")))?;

    let removed = clean_command_files(&commands_root);

    let mut staged = BTreeMap::new();
    for (name, markdown) in commands {
        if !is_valid_component_name(name) {
            return Err(Error::bad_request(format!("Invalid slash command name: {name}")));
        }
        let target = safe_join(&commands_root, &format!("{name}.md"))
            .map_err(|e| Error::bad_request(format!("Invalid slash command path: {e}")))?;
        if let Err(e) = std::fs::write(&target, markdown) {
            return Err(Error::external(format!("Failed to stage slash command {name}: {e}")));
        }
        staged.insert(name.clone(), target.to_string_lossy().to_string());
    }

    if removed > 0 {
        warn!(removed, "replaced previously staged slash commands");
    }
    info!(
        step = "slash_command_stage_total",
        duration_ms = started_total.elapsed().as_millis() as u64,
        user_id,
        session_id,
        commands_requested = commands.len(),
        commands_staged = staged.len(),
        commands_removed = removed,
        "timing"
    );
    Ok(staged)
}
