use async_trait::async_trait;

use loom_core::{ExecutionLogEntry, Goal, MemoryItem, PendingExecutionError, ReasoningStep, Task};

use crate::error::StoreError;

/// The storage collaborator the orchestration core reads from and writes back to.
///
/// Loads must return empty collections (never an error) for an empty store.
/// The core never mutates entities directly; every write goes through here.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_tasks(&self) -> Result<Vec<Task>, StoreError>;
    async fn load_goals(&self) -> Result<Vec<Goal>, StoreError>;
    async fn load_memory(&self) -> Result<Vec<MemoryItem>, StoreError>;
    async fn load_reasoning_log(&self) -> Result<Vec<ReasoningStep>, StoreError>;
    async fn load_execution_log(&self) -> Result<Vec<ExecutionLogEntry>, StoreError>;
    async fn load_vault_summary(&self) -> Result<String, StoreError>;
    async fn load_pending_error(&self) -> Result<Option<PendingExecutionError>, StoreError>;

    /// Write or clear (`None`) the pending-error slot.
    async fn save_pending_error(
        &self,
        record: Option<PendingExecutionError>,
    ) -> Result<(), StoreError>;

    /// Replace the whole reasoning log (used after compaction).
    async fn save_reasoning_log(&self, entries: Vec<ReasoningStep>) -> Result<(), StoreError>;

    /// Replace the whole execution log (used after compaction).
    async fn save_execution_log(&self, entries: Vec<ExecutionLogEntry>)
        -> Result<(), StoreError>;

    async fn append_reasoning(&self, step: ReasoningStep) -> Result<(), StoreError>;
    async fn append_execution(&self, entry: ExecutionLogEntry) -> Result<(), StoreError>;
}
