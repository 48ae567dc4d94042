//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MuseSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `MUSE_*` environment variable overrides (highest priority)
//! 4. Normalize extensions and validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{Device, MuseSettings, normalize_extension};

/// Env var naming an explicit settings file.
pub const SETTINGS_FILE_ENV: &str = "MUSE_SETTINGS_FILE";

/// Settings file used when [`SETTINGS_FILE_ENV`] is unset.
pub const DEFAULT_SETTINGS_FILE: &str = "muse.json";

/// Resolve the settings file path.
pub fn settings_path() -> PathBuf {
    std::env::var(SETTINGS_FILE_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE), PathBuf::from)
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MuseSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a settings combination
/// that fails [`MuseSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<MuseSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    finalize(settings)
}

/// Defaults merged with the settings file, without env overrides.
pub fn read_file_layer(path: &Path) -> Result<MuseSettings> {
    let defaults = serde_json::to_value(MuseSettings::default())?;

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

    Ok(serde_json::from_value(merged)?)
}

/// Normalize list values and run validation.
pub fn finalize(mut settings: MuseSettings) -> Result<MuseSettings> {
    settings.upload.allowed_extensions = settings
        .upload
        .allowed_extensions
        .iter()
        .filter(|e| !e.trim().is_empty())
        .map(|e| normalize_extension(e))
        .collect();
    settings.validate()?;
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut MuseSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Each variable has strict parsing rules. Invalid values are logged and
/// ignored, leaving the file/default value in place.
pub fn apply_overrides<F>(settings: &mut MuseSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Model ───────────────────────────────────────────────────────
    if let Some(v) = env.string("MUSE_MODEL_NAME") {
        settings.model.name = v;
    }
    if let Some(v) = env.string("MUSE_MODEL_ONNX_FILE") {
        settings.model.onnx_file = v;
    }
    if let Some(v) = env.device("MUSE_DEVICE") {
        settings.model.device = v;
    }
    if let Some(v) = env.string("MUSE_MODEL_CACHE_DIR") {
        settings.model.cache_dir = v;
    }
    if let Some(v) = env.usize("MUSE_TOP_K", 1, 1000) {
        settings.model.top_k = v;
    }
    if let Some(v) = env.usize("MUSE_INTRA_THREADS", 1, 256) {
        settings.model.intra_threads = v;
    }

    // ── Upload ──────────────────────────────────────────────────────
    if let Some(v) = env.u64("MUSE_MAX_FILE_SIZE", 1, u64::MAX) {
        settings.upload.max_file_size = v;
    }
    if let Some(v) = env.extensions("MUSE_ALLOWED_EXTENSIONS") {
        settings.upload.allowed_extensions = v;
    }
    if let Some(v) = env.usize("MUSE_MAX_BATCH_FILES", 1, 100) {
        settings.upload.max_batch_files = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("MUSE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("MUSE_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("MUSE_WORKERS", 1, 64) {
        settings.server.workers = v;
    }
    if let Some(v) = env.u64("MUSE_INFERENCE_TIMEOUT_SECS", 0, 86_400) {
        settings.server.inference_timeout_secs = v;
    }
    if let Some(v) = env.u64("MUSE_SHUTDOWN_TIMEOUT_SECS", 1, 3600) {
        settings.server.shutdown_timeout_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("MUSE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("MUSE_LOG_JSON") {
        settings.logging.json = v;
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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a comma separated extension list (`.mp3,wav, .FLAC`).
///
/// Also accepts a JSON array string. Returns `None` if no entries remain.
pub fn parse_extension_list(val: &str) -> Option<Vec<String>> {
    let raw: Vec<String> = if val.trim_start().starts_with('[') {
        serde_json::from_str(val).ok()?
    } else {
        val.split(',').map(str::to_string).collect()
    };
    let list: Vec<String> = raw
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(normalize_extension)
        .collect();
    (!list.is_empty()).then_some(list)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.raw(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.raw(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.raw(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.raw(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }

    fn device(&self, name: &str) -> Option<Device> {
        let val = self.string(name)?;
        match val.parse() {
            Ok(device) => Some(device),
            Err(_) => {
                warn!(key = name, value = %val, "invalid device env var, ignoring");
                None
            }
        }
    }

    fn extensions(&self, name: &str) -> Option<Vec<String>> {
        let val = self.raw(name)?;
        let result = parse_extension_list(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid extension list env var, ignoring");
        }
        result
    }
}
