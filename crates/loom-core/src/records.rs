use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Blocked,
}

impl TaskStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "blocked" => Ok(Self::Blocked),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub identifier: String,
    pub heading: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    pub fn new(identifier: impl Into<String>, heading: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            heading: heading.into(),
            content: String::new(),
            notes: None,
            status: TaskStatus::Pending,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub identifier: String,
    pub heading: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Goal {
    pub fn new(identifier: impl Into<String>, heading: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            heading: heading.into(),
            content: String::new(),
            notes: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }
}

/// A memory entry. Entries flagged `important` survive compaction.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryItem {
    pub identifier: String,
    pub heading: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub important: bool,
}

impl MemoryItem {
    pub fn new(
        identifier: impl Into<String>,
        heading: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            heading: heading.into(),
            content: content.into(),
            notes: None,
            important: false,
        }
    }

    pub fn important(mut self) -> Self {
        self.important = true;
        self
    }
}

/// One entry of the reasoning log.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningStep {
    pub timestamp: DateTime<Utc>,
    pub content: String,
    /// Kind of step (`"reasoning"`, `"summary"`, ...), aggregated when compacting.
    #[serde(default = "default_operation")]
    pub operation: String,
}

fn default_operation() -> String {
    "reasoning".into()
}

impl ReasoningStep {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            content: content.into(),
            operation: default_operation(),
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Append-only record of one execution outcome.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionLogEntry {
    pub fn success(source: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            success: true,
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn failure(source: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// The most recent failed execution, surfaced once in the next prompt.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingExecutionError {
    pub code: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub iteration: u32,
}

impl PendingExecutionError {
    pub fn new(code: impl Into<String>, error_message: impl Into<String>, iteration: u32) -> Self {
        Self {
            code: code.into(),
            error_message: error_message.into(),
            stack: None,
            references: Vec::new(),
            timestamp: Utc::now(),
            iteration,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }
}
