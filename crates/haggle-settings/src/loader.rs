//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HaggleSettings::default()`]
//! 2. If `~/.haggle/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::HaggleSettings;

/// Resolve the path to the settings file (`~/.haggle/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".haggle").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HaggleSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<HaggleSettings> {
    let defaults = serde_json::to_value(HaggleSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: HaggleSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
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

/// Apply environment variable overrides to loaded settings.
///
/// Each env var has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are silently ignored (fall back to file/default)
pub fn apply_env_overrides(settings: &mut HaggleSettings) {
    // ── Gateway ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("HAGGLE_GATEWAY_URL") {
        settings.gateway.endpoint = v;
    }
    if let Some(v) = read_env_i64("HAGGLE_MESSAGE_EXPIRY_MS", 1000, 86_400_000) {
        settings.gateway.message_expiry_ms = v;
    }

    // ── Credentials ─────────────────────────────────────────────────
    if let Some(v) = read_env_string("HAGGLE_COOKIES") {
        settings.credentials.cookie = Some(v);
    }
    if let Some(v) = read_env_u64("HAGGLE_TOKEN_REFRESH_MS", 60_000, 86_400_000) {
        settings.credentials.refresh_interval_ms = v;
    }
    if let Some(v) = read_env_u64("HAGGLE_TOKEN_RETRY_MS", 1000, 3_600_000) {
        settings.credentials.retry_delay_ms = v;
    }

    // ── Heartbeat ───────────────────────────────────────────────────
    if let Some(v) = read_env_u64("HAGGLE_HEARTBEAT_INTERVAL_MS", 1000, 600_000) {
        settings.heartbeat.interval_ms = v;
    }
    if let Some(v) = read_env_u64("HAGGLE_HEARTBEAT_TIMEOUT_MS", 100, 600_000) {
        settings.heartbeat.timeout_ms = v;
    }

    // ── Batching ────────────────────────────────────────────────────
    if let Some(v) = read_env_bool("HAGGLE_BATCHING_ENABLED") {
        settings.batching.enabled = v;
    }
    if let Some(v) = read_env_u64("HAGGLE_BATCH_WINDOW_MS", 100, 60_000) {
        settings.batching.window_ms = v;
    }
    if let Some(v) = read_env_usize("HAGGLE_MAX_BATCH_SIZE", 1, 50) {
        settings.batching.max_batch_size = v;
    }

    // ── Routing / LLM ───────────────────────────────────────────────
    if let Some(v) = read_env_bool("HAGGLE_ROUTING_ENABLED") {
        settings.routing.enabled = v;
    }
    if let Some(v) = read_env_string("HAGGLE_API_KEY") {
        settings.llm.api_key = Some(v);
    }
    if let Some(v) = read_env_string("HAGGLE_LLM_BASE_URL") {
        settings.llm.base_url = v;
    }

    // ── Takeover / store / logging ──────────────────────────────────
    if let Some(v) = read_env_string("HAGGLE_TOGGLE_KEYWORD") {
        settings.takeover.toggle_keyword = v;
    }
    if let Some(v) = read_env_u64("HAGGLE_TAKEOVER_TIMEOUT_MS", 1000, 86_400_000) {
        settings.takeover.timeout_ms = v;
    }
    if let Some(v) = read_env_string("HAGGLE_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = read_env_string("HAGGLE_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as an `i64` within a range.
pub fn parse_i64_range(val: &str, min: i64, max: i64) -> Option<i64> {
    let n: i64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

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

fn read_env_i64(name: &str, min: i64, max: i64) -> Option<i64> {
    let val = std::env::var(name).ok()?;
    let result = parse_i64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid i64 env var, ignoring");
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

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
