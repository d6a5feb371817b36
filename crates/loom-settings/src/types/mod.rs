//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]`. Each implements
//! [`Default`] with production values, and `#[serde(default)]` lets partial
//! JSON fill in the rest.

mod context;
mod execution;

pub use context::*;
pub use execution::*;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::errors::SettingsError;

/// Root settings type.
///
/// ```json
/// {
///   "loop": { "maxIterations": 25 },
///   "execution": { "strategy": "referenceAware", "maxAttempts": 3, "enableRetry": true }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoomSettings {
    /// Prompt assembly.
    pub context: ContextSettings,
    /// History bounding.
    pub compaction: CompactionSettings,
    /// Execution policy for model-issued code.
    pub execution: ExecutionSettings,
    #[serde(rename = "loop")]
    pub loop_: LoopSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl LoomSettings {
    /// Reject combinations no component can run with. Called after every
    /// layer has been applied.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let mut seen = HashSet::new();
        for section in &self.context.sections {
            if section.id.trim().is_empty() || section.provider_id.trim().is_empty() {
                return Err(SettingsError::Invalid(format!(
                    "section '{}' needs both an id and a providerId",
                    section.id
                )));
            }
            if !seen.insert(section.id.as_str()) {
                return Err(SettingsError::Invalid(format!(
                    "section id '{}' is declared twice",
                    section.id
                )));
            }
        }

        let exec = &self.execution;
        if exec.interpreter.is_empty() {
            return Err(SettingsError::Invalid("execution.interpreter is empty".into()));
        }
        if !(0.0..=1.0).contains(&exec.jitter_factor) {
            return Err(SettingsError::Invalid(format!(
                "execution.jitterFactor must be within 0..=1, got {}",
                exec.jitter_factor
            )));
        }
        if exec.base_delay_ms > exec.max_delay_ms {
            return Err(SettingsError::Invalid(format!(
                "execution.baseDelayMs ({}) exceeds maxDelayMs ({})",
                exec.base_delay_ms, exec.max_delay_ms
            )));
        }
        if self.loop_.max_iterations == 0 {
            return Err(SettingsError::Invalid("loop.maxIterations must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// SQLite state database. A leading `~/` expands to `$HOME`.
    pub database_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: "~/.loom/loom.db".to_string(),
        }
    }
}

impl StorageSettings {
    /// Database path with `~/` expanded.
    pub fn resolved_database_path(&self) -> std::path::PathBuf {
        match self.database_path.strip_prefix("~/") {
            Some(rest) => crate::loader::home_dir().join(rest),
            None => std::path::PathBuf::from(&self.database_path),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Base level (`trace`..`error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides, e.g. `{"loom_engine::context": "trace"}`.
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: HashMap::new(),
        }
    }
}
