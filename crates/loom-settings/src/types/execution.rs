//! Execution policy settings.

use serde::{Deserialize, Serialize};

/// Which execution policy the loop runs model-issued work under.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    /// One attempt, no retries.
    #[default]
    Direct,
    /// Retry any failure with exponential backoff.
    Retry,
    /// Retry only reference errors and timeouts, resetting context first.
    ReferenceAware,
}

impl std::str::FromStr for StrategyKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "retry" => Ok(Self::Retry),
            "referenceAware" | "reference_aware" => Ok(Self::ReferenceAware),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionSettings {
    pub strategy: StrategyKind,
    pub max_attempts: u32,
    pub enable_retry: bool,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
    /// Per-attempt timeout. Unset means attempts run to completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub clean_context_on_retry: bool,
    /// Command prefix the process runner executes code with.
    pub interpreter: Vec<String>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Direct,
            max_attempts: 1,
            enable_retry: false,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter_factor: 0.2,
            timeout_ms: None,
            clean_context_on_retry: false,
            interpreter: vec!["sh".to_string(), "-c".to_string()],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoopSettings {
    pub max_iterations: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}
