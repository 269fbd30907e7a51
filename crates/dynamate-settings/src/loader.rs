//! Settings loading with deep merge and environment variable overrides.
//!
//! 1. Start with compiled [`DynamateSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `DYNAMATE_*` environment overrides
//! 4. Validate
//!
//! Objects merge recursively; arrays and primitives are replaced; nulls in the
//! file are skipped.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::DynamateSettings;

/// Settings file used when neither `--settings` nor `DYNAMATE_SETTINGS` is given.
pub const DEFAULT_SETTINGS_FILE: &str = "dynamate.json";

/// Resolve the settings file: explicit path, then `DYNAMATE_SETTINGS`, then `./dynamate.json`.
pub fn settings_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    std::env::var("DYNAMATE_SETTINGS")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
}

pub fn load_settings(explicit: Option<&Path>) -> Result<DynamateSettings> {
    load_settings_from_path(&settings_path(explicit))
}

/// Load from a specific path with env overrides. A missing file yields defaults;
/// invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<DynamateSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<DynamateSettings> {
    let defaults = serde_json::to_value(DynamateSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `DYNAMATE_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut DynamateSettings) {
    apply_overrides_with(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup. Invalid values are logged and ignored.
pub fn apply_overrides_with(settings: &mut DynamateSettings, lookup: &dyn Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Model ───────────────────────────────────────────────────────
    if let Some(v) = env.string("DYNAMATE_MODEL") {
        settings.model.name = v;
    }
    if let Some(v) = env.f64_range("DYNAMATE_TEMPERATURE", 0.0, 2.0) {
        settings.model.temperature = v;
    }
    if let Some(v) = env.bool("DYNAMATE_SUPPORTS_SYSTEM_MESSAGES") {
        settings.model.supports_system_messages = v;
    }
    if let Some(v) = env.string("DYNAMATE_BASE_URL") {
        settings.model.base_url = v;
    }
    if let Some(v) = env.u64_range("DYNAMATE_REQUEST_TIMEOUT_SECS", 1, 86_400) {
        settings.model.request_timeout_secs = v;
    }
    if let Some(v) = env.u64_range("DYNAMATE_MAX_RETRIES", 0, 20) {
        settings.retry.max_retries = v as u32;
    }

    // ── Context ─────────────────────────────────────────────────────
    if let Some(v) = env.u64_range("DYNAMATE_MAX_CONTEXT_TOKENS", 1000, 2_000_000) {
        settings.context.max_context_tokens = v as u32;
    }
    if let Some(v) = env.u64_range("DYNAMATE_MAX_CHARACTERS_TO_LOG", 100, 1_000_000) {
        settings.context.max_characters_to_log = v as usize;
    }

    // ── Agent ───────────────────────────────────────────────────────
    if let Some(v) = env.u64_range("DYNAMATE_MAX_EXECUTION_TURNS", 1, 10_000) {
        settings.agent.max_execution_turns = v as u32;
    }

    // ── Paths ───────────────────────────────────────────────────────
    if let Some(v) = env.string("DYNAMATE_SANDBOX_ROOT") {
        settings.paths.sandbox_root = PathBuf::from(v);
    }
    if let Some(v) = env.string("DYNAMATE_AGENT_LOGS") {
        settings.paths.agent_logs = PathBuf::from(v);
    }
    if let Some(v) = env.string("DYNAMATE_SCRIPTS_DIR") {
        settings.paths.mdp_dir = PathBuf::from(&v).join("mdp_files");
        settings.paths.scripts_dir = PathBuf::from(v);
    }
    if let Some(v) = env.string("DYNAMATE_PAPER_DIR") {
        settings.paths.paper_dir = PathBuf::from(v);
    }

    // ── Tools ───────────────────────────────────────────────────────
    if let Some(v) = env.string("DYNAMATE_RCSB_URL") {
        settings.tools.rcsb_base_url = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("DYNAMATE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("DYNAMATE_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Reject combinations that would make the agents misbehave.
pub fn validate(settings: &DynamateSettings) -> Result<()> {
    let ctx = &settings.context;
    if ctx.max_context_tokens == 0 {
        return Err(SettingsError::InvalidValue(
            "context.maxContextTokens must be greater than 0".into(),
        ));
    }
    if ctx.max_characters_to_log == 0 {
        return Err(SettingsError::InvalidValue(
            "context.maxCharactersToLog must be greater than 0".into(),
        ));
    }
    let agent = &settings.agent;
    if agent.default_temperature_k <= 0.0 || agent.default_duration_ns <= 0.0 {
        return Err(SettingsError::InvalidValue(
            "agent default temperature and duration must be positive".into(),
        ));
    }
    if !(0.0..=1.0).contains(&settings.retry.jitter_factor) {
        return Err(SettingsError::InvalidValue(format!(
            "retry.jitterFactor must be within 0.0..=1.0, got {}",
            settings.retry.jitter_factor
        )));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_range(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }

    fn f64_range(&self, name: &str, min: f64, max: f64) -> Option<f64> {
        let val = (self.lookup)(name)?;
        let result = parse_f64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid float env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> DynamateSettings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut settings = DynamateSettings::default();
        apply_overrides_with(&mut settings, &|name| map.get(name).cloned());
        settings
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"model": {"name": "a", "temperature": 0.1}});
        let source = serde_json::json!({"model": {"name": "b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["model"]["name"], "b");
        assert_eq!(merged["model"]["temperature"], 0.1);
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/dynamate.json")).unwrap();
        assert_eq!(settings.model.name, "openrouter/openai/gpt-4.1-2025-04-14");
        assert_eq!(settings.context.max_context_tokens, 32_000);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynamate.json");
        std::fs::write(
            &path,
            r#"{"context": {"maxContextTokens": 16000}, "agent": {"maxParameterAttempts": 2}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.context.max_context_tokens, 16_000);
        assert_eq!(settings.context.summary_output_tokens, 6000);
        assert_eq!(settings.agent.max_parameter_attempts, 2);
        assert_eq!(settings.agent.max_structure_attempts, 10);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynamate.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_zero_context_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynamate.json");
        std::fs::write(&path, r#"{"context": {"maxContextTokens": 0}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    #[test]
    fn explicit_path_wins() {
        assert_eq!(
            settings_path(Some(Path::new("/etc/dm.json"))),
            PathBuf::from("/etc/dm.json")
        );
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let s = overrides(&[
            ("DYNAMATE_MODEL", "openai/gpt-4o"),
            ("DYNAMATE_TEMPERATURE", "0.5"),
            ("DYNAMATE_SUPPORTS_SYSTEM_MESSAGES", "no"),
            ("DYNAMATE_MAX_CONTEXT_TOKENS", "64000"),
            ("DYNAMATE_SCRIPTS_DIR", "/opt/scripts"),
            ("DYNAMATE_LOG_JSON", "on"),
        ]);
        assert_eq!(s.model.name, "openai/gpt-4o");
        assert_eq!(s.model.temperature, 0.5);
        assert!(!s.model.supports_system_messages);
        assert_eq!(s.context.max_context_tokens, 64_000);
        assert_eq!(s.paths.scripts_dir, PathBuf::from("/opt/scripts"));
        assert_eq!(s.paths.mdp_dir, PathBuf::from("/opt/scripts/mdp_files"));
        assert!(s.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let s = overrides(&[
            ("DYNAMATE_TEMPERATURE", "hot"),
            ("DYNAMATE_MAX_CONTEXT_TOKENS", "10"),
            ("DYNAMATE_LOG_JSON", "maybe"),
            ("DYNAMATE_MODEL", ""),
        ]);
        let defaults = DynamateSettings::default();
        assert_eq!(s.model.temperature, defaults.model.temperature);
        assert_eq!(s.context.max_context_tokens, defaults.context.max_context_tokens);
        assert!(!s.logging.json);
        assert_eq!(s.model.name, defaults.model.name);
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "ON"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "no", "Off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("200", 1, 10_000), Some(200));
        assert_eq!(parse_u64_range("0", 1, 10_000), None);
        assert_eq!(parse_f64_range("0.7", 0.0, 2.0), Some(0.7));
        assert_eq!(parse_f64_range("NaN", 0.0, 2.0), None);
        assert_eq!(parse_f64_range("3", 0.0, 2.0), None);
    }
}
