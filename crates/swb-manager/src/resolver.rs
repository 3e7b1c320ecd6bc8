// SPDX-License-Identifier: MIT OR Apache-2.0
//! Config resolution: `$ref` preset expansion and `${env:NAME}`
//! substitution, applied to a session's config snapshot before
//! dispatch.

use crate::backend_client::BackendClient;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use swb_core::{McpPreset, RequestContext, SkillPreset, TaskConfig};
use swb_error::{Error, ErrorKind, Result};
use tokio::sync::Mutex;

/// How long preset lists are cached.
const PRESET_CACHE_SECONDS: i64 = 60;

#[derive(Default)]
struct PresetCache {
    until: Option<DateTime<Utc>>,
    mcp: BTreeMap<String, McpPreset>,
    skills: BTreeMap<String, SkillPreset>,
}

/// Resolves `$ref: "preset:<name>"` and `${env:NAME}` in config
/// snapshots, with a short-lived preset cache.
pub struct ConfigResolver {
    backend: Arc<BackendClient>,
    cache: Mutex<PresetCache>,
}

/// Substitute every `${env:NAME}` occurrence in `input`.
fn substitute_env(input: &str, env: &BTreeMap<String, String>) -> Result<String> {
    const OPEN: &str = "${env:";
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        let Some(start) = rest.find(OPEN) else {
            output.push_str(rest);
            return Ok(output);
        };
        output.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find('}') else {
            // Unterminated placeholder passes through verbatim.
            output.push_str(&rest[start..]);
            return Ok(output);
        };
        let name = &after[..end];
        let value = env.get(name).ok_or_else(|| {
            Error::new(ErrorKind::EnvVarNotFound, format!("Env var not found: {name}"))
        })?;
        output.push_str(value);
        rest = &after[end + 1..];
    }
}

/// Recursively substitute env placeholders in every string value.
fn resolve_env_value(value: &Value, env: &BTreeMap<String, String>) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_env(s, env)?)),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_env_value(v, env))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, v) in map {
                out.insert(key.clone(), resolve_env_value(v, env)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn ref_preset_name(entry: &Map<String, Value>) -> Option<&str> {
    entry
        .get("$ref")
        .and_then(Value::as_str)
        .map(|r| r.split_once(':').map_or(r, |(_, name)| name))
}

fn overlay(base: &mut Map<String, Value>, entry: &Map<String, Value>) {
    for (key, value) in entry {
        if key != "$ref" {
            base.insert(key.clone(), value.clone());
        }
    }
}

impl ConfigResolver {
    /// Resolver backed by `backend` for presets and env maps.
    pub fn new(backend: Arc<BackendClient>) -> Self {
        Self {
            backend,
            cache: Mutex::new(PresetCache::default()),
        }
    }

    async fn ensure_cache(&self, ctx: &RequestContext) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now();
        if cache.until.is_some_and(|until| now < until) {
            return Ok(());
        }
        let mcp = self.backend.list_mcp_presets(ctx, true).await?;
        let skills = self.backend.list_skill_presets(ctx, true).await?;
        cache.mcp = mcp.into_iter().map(|p| (p.name.clone(), p)).collect();
        cache.skills = skills.into_iter().map(|p| (p.name.clone(), p)).collect();
        cache.until = Some(now + Duration::seconds(PRESET_CACHE_SECONDS));
        Ok(())
    }

    async fn resolve_mcp_entry(
        &self,
        entry: &Map<String, Value>,
        env: &BTreeMap<String, String>,
    ) -> Result<Option<Value>> {
        if entry.get("enabled") == Some(&Value::Bool(false))
            || entry.get("disabled") == Some(&Value::Bool(true))
        {
            return Ok(None);
        }
        let Some(preset_name) = ref_preset_name(entry) else {
            return Ok(Some(resolve_env_value(&Value::Object(entry.clone()), env)?));
        };

        let cache = self.cache.lock().await;
        let preset = cache
            .mcp
            .get(preset_name)
            .filter(|p| p.is_active)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::McpPresetNotFound,
                    format!("MCP preset not found: {preset_name}"),
                )
            })?;

        let mut base = Map::new();
        base.insert("transport".to_string(), preset.transport.clone().unwrap_or(Value::Null));
        if let Some(Value::Object(defaults)) = &preset.default_config {
            for (key, value) in defaults {
                base.insert(key.clone(), value.clone());
            }
        }
        drop(cache);
        overlay(&mut base, entry);
        Ok(Some(resolve_env_value(&Value::Object(base), env)?))
    }

    async fn resolve_skill_entry(
        &self,
        entry: &Map<String, Value>,
        env: &BTreeMap<String, String>,
    ) -> Result<Option<Value>> {
        if entry.get("enabled") == Some(&Value::Bool(false)) {
            return Ok(Some(json!({"enabled": false})));
        }
        let Some(preset_name) = ref_preset_name(entry) else {
            return Ok(Some(resolve_env_value(&Value::Object(entry.clone()), env)?));
        };

        let cache = self.cache.lock().await;
        let preset = cache
            .skills
            .get(preset_name)
            .filter(|p| p.is_active)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::SkillPresetNotFound,
                    format!("Skill preset not found: {preset_name}"),
                )
            })?;

        let mut base = Map::new();
        base.insert("enabled".to_string(), Value::Bool(true));
        base.insert("entry".to_string(), preset.entry.clone().unwrap_or(Value::Null));
        base.insert(
            "config".to_string(),
            preset.default_config.clone().unwrap_or_else(|| json!({})),
        );
        drop(cache);
        overlay(&mut base, entry);
        Ok(Some(resolve_env_value(&Value::Object(base), env)?))
    }

    /// Resolve a config snapshot into the form handed to stagers and
    /// the executor.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        config: &TaskConfig,
    ) -> Result<Value> {
        self.ensure_cache(ctx).await?;
        let env = self.backend.get_env_map(ctx, user_id).await?;

        let mut resolved_mcp = Map::new();
        for (name, entry) in &config.mcp_config {
            match entry.as_object() {
                Some(entry) => {
                    if let Some(value) = self.resolve_mcp_entry(entry, &env).await? {
                        resolved_mcp.insert(name.clone(), value);
                    }
                }
                None => {
                    resolved_mcp.insert(name.clone(), entry.clone());
                }
            }
        }

        let mut resolved_skills = Map::new();
        for (name, entry) in &config.skill_files {
            if let Some(entry) = entry.as_object() {
                if let Some(value) = self.resolve_skill_entry(entry, &env).await? {
                    resolved_skills.insert(name.clone(), value);
                }
            }
        }

        let mut out = serde_json::to_value(config)
            .map_err(|e| Error::new(ErrorKind::InvalidInput, e.to_string()))?;
        out["mcp_config"] = Value::Object(resolved_mcp);
        out["skill_files"] = Value::Object(resolved_skills);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> BTreeMap<String, String> {
        [("TOKEN".to_string(), "secret".to_string())].into_iter().collect()
    }

    #[test]
    fn substitutes_multiple_placeholders() {
        let mut map = env();
        map.insert("HOST".into(), "api.example".into());
        let out = substitute_env("https://${env:HOST}/v1?key=${env:TOKEN}", &map).unwrap();
        assert_eq!(out, "https://api.example/v1?key=secret");
    }

    #[test]
    fn missing_env_var_fails() {
        let err = substitute_env("${env:MISSING}", &env()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::EnvVarNotFound);
    }

    #[test]
    fn unterminated_placeholder_passes_through() {
        let out = substitute_env("${env:TOKEN", &env()).unwrap();
        assert_eq!(out, "${env:TOKEN");
    }

    #[test]
    fn recursion_covers_arrays_and_maps() {
        let value = json!({"args": ["--key", "${env:TOKEN}"], "nested": {"t": "${env:TOKEN}"}});
        let out = resolve_env_value(&value, &env()).unwrap();
        assert_eq!(out["args"][1], "secret");
        assert_eq!(out["nested"]["t"], "secret");
    }

    #[test]
    fn ref_name_splits_on_first_colon() {
        let mut entry = Map::new();
        entry.insert("$ref".into(), json!("preset:web:search"));
        assert_eq!(ref_preset_name(&entry), Some("web:search"));
        entry.insert("$ref".into(), json!("plain"));
        assert_eq!(ref_preset_name(&entry), Some("plain"));
    }
}
