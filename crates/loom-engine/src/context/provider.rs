use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use loom_core::{ContextSection, ProviderError};
use loom_settings::ContextLimits;

use super::snapshot::StateSnapshot;

/// Everything a provider may read while filling one section.
#[derive(Clone)]
pub struct ProviderContext {
    pub query: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub limits: ContextLimits,
    pub snapshot: Arc<StateSnapshot>,
    /// The section being filled.
    pub section: ContextSection,
}

/// Output of [`ContextProvider::format`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rendered {
    Empty,
    Text(String),
    Lines(Vec<String>),
}

impl Rendered {
    /// Default rendering of a collected value: strings verbatim, arrays of
    /// strings one per line, null as empty, anything else as pretty JSON.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self::Empty,
            Value::String(s) => Self::Text(s),
            Value::Array(items) if items.iter().all(Value::is_string) => Self::Lines(
                items
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
            ),
            other => Self::Text(serde_json::to_string_pretty(&other).unwrap_or_default()),
        }
    }

    /// Trimmed section body. Empty when there is nothing to show.
    pub fn into_content(self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.trim().to_string(),
            Self::Lines(lines) => lines
                .iter()
                .map(|l| l.trim_end())
                .filter(|l| !l.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for Rendered {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<String>> for Rendered {
    fn from(lines: Vec<String>) -> Self {
        Self::Lines(lines)
    }
}

/// A pluggable source of prompt text.
///
/// Both stages are optional: the default `collect` passes through the
/// snapshot field named after the provider id, and the default `format`
/// stringifies whatever was collected.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn collect(&self, ctx: &ProviderContext) -> Result<Value, ProviderError> {
        Ok(ctx.snapshot.field(self.id()).await)
    }

    async fn format(&self, value: Value, _ctx: &ProviderContext) -> Result<Rendered, ProviderError> {
        Ok(Rendered::from_value(value))
    }
}

/// Decode a collected value into a typed record, mapping failure to a
/// format error.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value).map_err(|e| ProviderError::Format(e.to_string()))
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Value, ProviderError> {
    serde_json::to_value(value).map_err(|e| ProviderError::Collect(e.to_string()))
}
