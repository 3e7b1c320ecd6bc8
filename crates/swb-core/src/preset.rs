// SPDX-License-Identifier: MIT OR Apache-2.0
//! Named, reusable configuration templates referenced by `$ref`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A reusable MCP server configuration template.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct McpPreset {
    /// Preset name; `$ref: "preset:<name>"` resolves against this.
    pub name: String,
    /// Transport description merged in as the base config.
    #[serde(default)]
    pub transport: Option<Value>,
    /// Default configuration overlaid under caller entries.
    #[serde(default)]
    pub default_config: Option<Value>,
    /// Inactive presets fail resolution.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// A reusable skill configuration template.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SkillPreset {
    /// Preset name.
    pub name: String,
    /// Skill entry descriptor (object key, prefix flag, ...).
    #[serde(default)]
    pub entry: Option<Value>,
    /// Default configuration attached under `config`.
    #[serde(default)]
    pub default_config: Option<Value>,
    /// Inactive presets fail resolution.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}
