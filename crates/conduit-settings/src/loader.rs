//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::ConduitSettings;

/// `~/.conduit`, or `/tmp/.conduit` when `HOME` is unset.
pub fn conduit_home() -> PathBuf {
    home_dir().join(".conduit")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Expand a leading `~/` against `HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if path == "~" => home_dir(),
        None => PathBuf::from(path),
    }
}

/// Resolve the path to the settings file (`~/.conduit/settings.json`).
pub fn settings_path() -> PathBuf {
    conduit_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ConduitSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<ConduitSettings> {
    let defaults = serde_json::to_value(ConduitSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ConduitSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut ConduitSettings) {
    if let Some(v) = read_env_u16("CONDUIT_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("CONDUIT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_string("CONDUIT_AGENT_BINARY") {
        settings.agent.binary = v;
    }
    if let Some(v) = read_env_string("CONDUIT_CHAT_DIR") {
        settings.agent.chat_dir = v;
    }
    if let Some(v) = read_env_string("CONDUIT_WORKSPACE_DIR") {
        settings.agent.workspace_dir = v;
    }
    if let Some(v) = read_env_string("CONDUIT_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = read_env_usize("CONDUIT_MAX_TERMINALS", 1, 64) {
        settings.terminal.max_sessions = v;
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_nested_override() {
        let target = json!({"server": {"port": 8000, "host": "127.0.0.1"}});
        let source = json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn merge_skips_null_and_replaces_arrays() {
        let target = json!({"a": 1, "list": [1, 2, 3]});
        let source = json!({"a": null, "list": [9]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["list"], json!([9]));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.generation.retention_secs, 600);
        assert_eq!(s.discovery.reserved_denied_tool, "AskUserQuestion");
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "agent": {"binary": "/opt/agent"},
                "discovery": {"defaultServers": {"docs": {"type": "sse", "url": "http://localhost:9/sse"}}}
            }"#,
        )
        .unwrap();
        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.agent.binary, "/opt/agent");
        assert_eq!(s.agent.default_model, "sonnet");
        assert!(s.discovery.default_servers.contains_key("docs"));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn mistyped_value_is_a_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "eighty"}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Shape(_)));
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("abc", 1, 65535), None);
        assert_eq!(parse_usize_range("100", 1, 64), None);
    }

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        assert_eq!(expand_home("/srv/chat"), PathBuf::from("/srv/chat"));
        assert!(expand_home("~/chat").ends_with("chat"));
        assert!(!expand_home("~/chat").starts_with("~"));
    }
}
