use std::time::Duration;

/// Programming mistakes detected at registration or submission time.
/// These fail fast instead of degrading.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("provider has an empty identifier")]
    MissingProviderId,
    #[error("provider '{0}' is already registered with a different instance")]
    DuplicateProvider(String),
    #[error("execution request has no code")]
    MissingCode,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure of a single context provider. Never escapes the prompt builder.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider '{0}' is not registered")]
    NotFound(String),
    #[error("collect failed: {0}")]
    Collect(String),
    #[error("format failed: {0}")]
    Format(String),
    #[error("provider panicked: {0}")]
    Panicked(String),
}

/// Typed failure of model-issued work.
/// Classifies errors as reference-related, timeouts, or ordinary failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("{message}")]
    Failed {
        message: String,
        stack: Option<String>,
    },
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("runner unavailable: {0}")]
    RunnerUnavailable(String),
}

/// Message fragments that indicate the code referred to something that was
/// never fetched or defined.
const REFERENCE_MARKERS: &[&str] = &[
    "is not defined",
    "not found",
    "undefined",
    "no such file",
    "cannot find",
    "unbound variable",
    "command not found",
];

impl ExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            stack: None,
        }
    }

    pub fn is_reference_error(&self) -> bool {
        match self {
            Self::UnresolvedReference(_) => true,
            Self::Failed { message, .. } => {
                let lower = message.to_lowercase();
                REFERENCE_MARKERS.iter().any(|m| lower.contains(m))
            }
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::Failed { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } if self.is_reference_error() => "reference",
            Self::Failed { .. } => "failed",
            Self::Timeout(_) => "timeout",
            Self::UnresolvedReference(_) => "unresolved_reference",
            Self::Rejected(_) => "rejected",
            Self::RunnerUnavailable(_) => "runner_unavailable",
        }
    }
}

/// Failure reported by the model collaborator.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model returned no reply")]
    Exhausted,
}
