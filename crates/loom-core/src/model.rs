use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

/// What the model handed back for one prompt.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelReply {
    /// Free-form reasoning text, appended to the reasoning log.
    #[serde(default)]
    pub reasoning: String,
    /// Code or action to execute, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

impl ModelReply {
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning: text.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// The model collaborator. The assembled prompt is the whole payload.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<ModelReply, ModelError>;
}
