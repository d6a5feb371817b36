use loom_core::ConfigError;
use loom_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// A compaction strategy failure. Caught per key; the key keeps its
/// pre-compaction value.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CompactionError {
    #[error("strategy '{key}' failed: {message}")]
    Strategy { key: String, message: String },

    #[error("strategy '{0}' panicked: {1}")]
    Panicked(String, String),
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
