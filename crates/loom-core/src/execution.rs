use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ExecutionError;
use crate::ids::ExecutionId;

/// One unit of model-issued work.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub code: String,
    /// External references (vault keys, URLs) the code depends on.
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            references: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Trace of one attempt.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrategyMetadata {
    pub strategy_name: String,
    pub attempt_count: u32,
    pub execution_id: ExecutionId,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
}

/// Outcome of running a request under an execution policy.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub success: bool,
    pub value: Option<serde_json::Value>,
    pub error: Option<ExecutionError>,
    /// The request as actually executed (after `before_execution` rewrites).
    pub request: ExecutionRequest,
    pub metadata: StrategyMetadata,
}

impl ExecutionResult {
    /// Render the value as text for logs and prompts.
    pub fn value_text(&self) -> Option<String> {
        self.value.as_ref().map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_metadata_skipped_when_null() {
        let req = ExecutionRequest::new("print(1)");
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("metadata").is_none());
        assert_eq!(json["references"], serde_json::json!([]));
    }

    #[test]
    fn value_text_unquotes_strings() {
        let result = ExecutionResult {
            success: true,
            value: Some(serde_json::json!("hello")),
            error: None,
            request: ExecutionRequest::new("x"),
            metadata: StrategyMetadata {
                strategy_name: "direct".into(),
                attempt_count: 1,
                execution_id: ExecutionId::new(),
                attempts: vec![],
            },
        };
        assert_eq!(result.value_text().as_deref(), Some("hello"));
    }
}
