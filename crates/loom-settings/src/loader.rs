//! Settings layering.
//!
//! Compiled defaults, then the user's `~/.loom/settings.json` merged on top,
//! then `LOOM_*` environment variables. Objects merge key by key; arrays and
//! scalars in a higher layer replace the lower value outright; `null` means
//! "keep the lower value".

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LoomSettings, StrategyKind};

pub(crate) fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

/// `~/.loom/settings.json`
pub fn settings_path() -> PathBuf {
    home_dir().join(".loom").join("settings.json")
}

pub fn load_settings() -> Result<LoomSettings> {
    load_settings_from_path(&settings_path())
}

/// Defaults, the file at `path` (if present), then the environment.
/// The result is validated before it is returned.
pub fn load_settings_from_path(path: &Path) -> Result<LoomSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_layers(path: &Path) -> Result<LoomSettings> {
    let parse_err = |source| SettingsError::Parse {
        path: path.to_owned(),
        source,
    };
    let mut tree = serde_json::to_value(LoomSettings::default()).map_err(parse_err)?;

    match std::fs::read_to_string(path) {
        Ok(text) => {
            let layer: Value = serde_json::from_str(&text).map_err(parse_err)?;
            deep_merge(&mut tree, layer);
            debug!(path = %path.display(), "settings file merged");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_owned(),
                source,
            })
        }
    }

    serde_json::from_value(tree).map_err(parse_err)
}

/// Merge `overlay` into `base` in place.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    let Value::Object(layer) = overlay else {
        if !overlay.is_null() {
            *base = overlay;
        }
        return;
    };
    let Value::Object(fields) = base else {
        *base = Value::Object(layer);
        return;
    };
    for (key, value) in layer {
        if value.is_null() {
            continue;
        }
        match fields.get_mut(&key) {
            Some(slot) => deep_merge(slot, value),
            None => {
                fields.insert(key, value);
            }
        }
    }
}

pub fn apply_env_overrides(settings: &mut LoomSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply `LOOM_*` overrides read through `lookup`. Unparseable or
/// out-of-range values are logged and skipped.
pub fn apply_overrides_from<F>(settings: &mut LoomSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(n) = read(&var, "LOOM_MAX_ITERATIONS", |v| bounded(v, 1, 10_000)) {
        settings.loop_.max_iterations = n as u32;
    }
    if let Some(n) = read(&var, "LOOM_MAX_ATTEMPTS", |v| bounded(v, 1, 100)) {
        settings.execution.max_attempts = n as u32;
    }
    if let Some(on) = read(&var, "LOOM_ENABLE_RETRY", parse_flag) {
        settings.execution.enable_retry = on;
    }
    if let Some(ms) = read(&var, "LOOM_TIMEOUT_MS", |v| bounded(v, 1, 3_600_000)) {
        settings.execution.timeout_ms = Some(ms);
    }
    if let Some(kind) = read(&var, "LOOM_STRATEGY", |v| v.parse::<StrategyKind>().ok()) {
        settings.execution.strategy = kind;
    }
    if let Some(path) = var("LOOM_DB_PATH") {
        settings.storage.database_path = path;
    }
    if let Some(level) = var("LOOM_LOG_LEVEL") {
        settings.logging.level = level;
    }
    if let Some(on) = read(&var, "LOOM_LOG_JSON", parse_flag) {
        settings.logging.json = on;
    }
}

fn read<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = var(name)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!(key = name, value = %raw, "ignoring unusable environment override");
    }
    parsed
}

/// `true/yes/on/1` or `false/no/off/0`, any case.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// An integer within `min..=max`.
pub fn bounded(raw: &str, min: u64, max: u64) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|n| (min..=max).contains(n))
}
