use serde::{Deserialize, Serialize};

/// One declared slice of the prompt, backed by exactly one provider.
///
/// The order of a section list is the order of the assembled prompt.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContextSection {
    pub id: String,
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(default = "default_include_when_empty")]
    pub include_when_empty: bool,
}

fn default_include_when_empty() -> bool {
    true
}

impl ContextSection {
    pub fn new(id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
            heading: None,
            fallback: None,
            include_when_empty: true,
        }
    }

    pub fn heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = Some(heading.into());
        self
    }

    pub fn fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Omit the section entirely when its provider yields nothing.
    pub fn omit_when_empty(mut self) -> Self {
        self.include_when_empty = false;
        self
    }
}
