//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CosSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `COS_*` environment variable overrides
//! 4. Validate the result
//!
//! Objects merge key by key; arrays and scalars from the file replace the
//! default outright; `null` in the file keeps the default.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::CosSettings;

/// Resolve the path to the settings file (`~/.cos/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".cos").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CosSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid merged value
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<CosSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_layers(path: &Path) -> Result<CosSettings> {
    let defaults = serde_json::to_value(CosSettings::default())?;

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

/// Merge `source` over `target`, recursing into objects.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `COS_*` environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut CosSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Empty values are treated as unset. Numbers must parse and fall within
/// range; anything invalid is ignored with a warning and the file or default
/// value stays in effect.
pub fn apply_overrides(settings: &mut CosSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("COS_EMAIL") {
        settings.account.email = v;
    }
    if let Some(v) = env.string("COS_GRANT_IDEN") {
        settings.account.grant_iden = v;
    }
    if let Some(v) = env.string("COS_SECRET") {
        settings.account.secret = v;
    }
    if let Some(v) = env.string("COS_API_BASE") {
        settings.api.base_url = v.trim_end_matches('/').to_owned();
    }
    if let Some(v) = env.bounded("COS_MAX_INSTANCES", 1, 1024) {
        settings.ai.max_concurrent_instances = v;
    }
    if let Some(v) = env.bounded("COS_TICK_RATE_HZ", 1, 1000) {
        settings.session.tick_rate_hz = v;
    }
    if let Some(v) = env.string("COS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.flag("COS_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Parse a boolean flag: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`,
/// case-insensitive.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u32` within `min..=max`.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    val.trim()
        .parse::<u32>()
        .ok()
        .filter(|n| (min..=max).contains(n))
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn flag(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let parsed = parse_bool(&val);
        if parsed.is_none() {
            warn!(key = name, value = %val, "ignoring invalid boolean override");
        }
        parsed
    }

    fn bounded(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        let val = self.string(name)?;
        let parsed = parse_u32_range(&val, min, max);
        if parsed.is_none() {
            warn!(key = name, value = %val, min, max, "ignoring out-of-range override");
        }
        parsed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;
    use cos_core::Role;
    use serde_json::json;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_simple_override() {
        let merged = deep_merge(json!({"a": 1, "b": 2}), json!({"b": 3}));
        assert_eq!(merged, json!({"a": 1, "b": 3}));
    }

    #[test]
    fn merge_nested_override() {
        let merged = deep_merge(
            json!({"transport": {"batchLimit": 16, "readTimeoutMs": 20000}}),
            json!({"transport": {"batchLimit": 8}}),
        );
        assert_eq!(
            merged,
            json!({"transport": {"batchLimit": 8, "readTimeoutMs": 20000}})
        );
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged, json!({"a": 1}));
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(json!({"list": ["a", "b"]}), json!({"list": ["c"]}));
        assert_eq!(merged, json!({"list": ["c"]}));
    }

    #[test]
    fn merge_adds_new_keys() {
        let merged = deep_merge(json!({"a": 1}), json!({"b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = read_layers(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.session.tick_rate_hz, 60);
        assert_eq!(settings.retry.base_delay_secs, 60);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"ai": {"role": "military", "clientAllowList": ["u1"]}, "retry": {"baseDelaySecs": 2}}"#,
        )
        .unwrap();

        let settings = read_layers(&path).unwrap();
        assert_eq!(settings.ai.role, Role::Military);
        assert_eq!(settings.ai.client_allow_list, vec!["u1".to_string()]);
        assert_eq!(settings.retry.base_delay_secs, 2);
        assert_eq!(settings.retry.max_exponent, 4);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_merged_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"transport": {"batchLimit": 0}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    // ── overrides ───────────────────────────────────────────────────

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut settings = CosSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("COS_EMAIL", "ai@example.com"),
                ("COS_SECRET", "s3cret"),
                ("COS_API_BASE", "http://localhost:8080/"),
                ("COS_TICK_RATE_HZ", "30"),
                ("COS_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.account.email, "ai@example.com");
        assert_eq!(settings.account.secret, "s3cret");
        assert_eq!(settings.api.base_url, "http://localhost:8080");
        assert_eq!(settings.session.tick_rate_hz, 30);
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = CosSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("COS_TICK_RATE_HZ", "0"),
                ("COS_MAX_INSTANCES", "lots"),
                ("COS_LOG_JSON", "maybe"),
                ("COS_LOG_LEVEL", ""),
            ]),
        );
        let defaults = CosSettings::default();
        assert_eq!(settings.session.tick_rate_hz, defaults.session.tick_rate_hz);
        assert_eq!(
            settings.ai.max_concurrent_instances,
            defaults.ai.max_concurrent_instances
        );
        assert!(!settings.logging.json);
        assert_eq!(settings.logging.level, defaults.logging.level);
    }

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "on", "TRUE", " on "] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "no", "off", "Off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_u32_bounds() {
        assert_eq!(parse_u32_range(" 4 ", 1, 1000), Some(4));
        assert_eq!(parse_u32_range("1000", 1, 1000), Some(1000));
        assert_eq!(parse_u32_range("0", 1, 1000), None);
        assert_eq!(parse_u32_range("1001", 1, 1000), None);
        assert_eq!(parse_u32_range("-1", 1, 1000), None);
    }
}
