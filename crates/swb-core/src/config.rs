// SPDX-License-Identifier: MIT OR Apache-2.0
//! Task configuration snapshots.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Container lifecycle requested for a session.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ContainerMode {
    /// Fresh container per run, deleted when the run finishes.
    #[default]
    Ephemeral,
    /// Long-lived container reused across sessions.
    Persistent,
}

impl fmt::Display for ContainerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ephemeral => f.write_str("ephemeral"),
            Self::Persistent => f.write_str("persistent"),
        }
    }
}

/// Configuration captured when a session is created and carried on every
/// claim. MCP and skill entries stay loosely typed because they flow
/// through the `$ref`/`${env:..}` resolver before dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TaskConfig {
    /// Owner of the session.
    #[serde(default)]
    pub user_id: String,
    /// Requested container lifecycle.
    #[serde(default)]
    pub container_mode: ContainerMode,
    /// Explicit container to reuse (persistent mode).
    #[serde(default)]
    pub container_id: Option<String>,
    /// MCP server entries keyed by name; values may carry `$ref`.
    #[serde(default)]
    pub mcp_config: BTreeMap<String, Value>,
    /// Skill entries keyed by name; values may carry `$ref`.
    #[serde(default)]
    pub skill_files: BTreeMap<String, Value>,
    /// User attachments to stage into the workspace `inputs/` directory.
    #[serde(default)]
    pub input_files: Vec<Value>,
    /// Forward-compatible passthrough for fields this tier does not
    /// interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TaskConfig {
    /// Config for `user_id` with everything else defaulted.
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_round_trip_through_extra() {
        let raw = json!({
            "user_id": "u1",
            "container_mode": "persistent",
            "model": "opus",
            "mcp_config": {"search": {"$ref": "preset:search"}}
        });
        let config: TaskConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.container_mode, ContainerMode::Persistent);
        assert_eq!(config.extra.get("model"), Some(&json!("opus")));

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["model"], json!("opus"));
        assert_eq!(back["mcp_config"]["search"]["$ref"], json!("preset:search"));
    }

    #[test]
    fn container_mode_defaults_to_ephemeral() {
        let config: TaskConfig = serde_json::from_value(json!({"user_id": "u1"})).unwrap();
        assert_eq!(config.container_mode, ContainerMode::Ephemeral);
        assert!(config.container_id.is_none());
    }
}
