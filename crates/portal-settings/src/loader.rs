//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PortalSettings::default()`]
//! 2. If `~/.portal/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `PORTAL_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{portal_dir, PortalSettings};

/// Resolve the path to the settings file (`~/.portal/settings.json`).
pub fn settings_path() -> PathBuf {
    portal_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PortalSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PortalSettings> {
    let defaults = serde_json::to_value(PortalSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PortalSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply environment variable overrides. Invalid values are logged and
/// ignored.
pub fn apply_env_overrides(settings: &mut PortalSettings) {
    if let Some(v) = read_env_string("PORTAL_GATEWAY_URL") {
        settings.gateway.url = v;
    }
    if let Some(v) = read_env_string("PORTAL_API_KEY") {
        settings.gateway.api_key = Some(v);
    }
    if let Some(v) = read_env_string("PORTAL_DEFAULT_MODEL") {
        settings.model.default_model = v;
    }
    if let Some(v) = read_env_u64("PORTAL_MAX_TOKENS", 1, 10_000_000) {
        settings.model.default_max_tokens = v;
    }
    if let Some(v) = read_env_u64("PORTAL_THROTTLE_MS", 1, 60_000) {
        settings.session.throttle_interval_ms = v;
    }
    if let Some(v) = read_env_bool("PORTAL_ALLOW_ANONYMOUS") {
        settings.session.allow_anonymous = v;
    }
    if let Some(v) = read_env_string("PORTAL_DB_PATH") {
        settings.storage.db_path = v;
    }
}

fn validate(settings: &PortalSettings) -> Result<()> {
    if settings.session.throttle_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "session.throttleIntervalMs must be positive".into(),
        ));
    }
    if settings.gateway.url.trim().is_empty() {
        return Err(SettingsError::InvalidValue("gateway.url is empty".into()));
    }
    Ok(())
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"session": {"throttleIntervalMs": 500, "allowAnonymous": false}});
        let source = serde_json::json!({"session": {"allowAnonymous": true}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["session"]["throttleIntervalMs"], 500);
        assert_eq!(merged["session"]["allowAnonymous"], true);
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
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        let defaults = PortalSettings::default();
        assert_eq!(settings.model.default_max_tokens, defaults.model.default_max_tokens);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"session": {"throttleIntervalMs": 250}, "model": {"defaultModel": "llama3"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.session.throttle_interval_ms, 250);
        assert_eq!(settings.model.default_model, "llama3");
        assert_eq!(settings.session.usage_history_limit, 25);
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
    fn zero_throttle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"session": {"throttleIntervalMs": 0}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("500", 1, 60_000), Some(500));
        assert_eq!(parse_u64_range("0", 1, 60_000), None);
        assert_eq!(parse_u64_range("abc", 1, 60_000), None);
    }
}
