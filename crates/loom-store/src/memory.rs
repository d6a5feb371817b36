use async_trait::async_trait;
use parking_lot::RwLock;

use loom_core::{ExecutionLogEntry, Goal, MemoryItem, PendingExecutionError, ReasoningStep, Task};

use crate::error::StoreError;
use crate::store::StateStore;

#[derive(Default)]
struct StoreState {
    tasks: Vec<Task>,
    goals: Vec<Goal>,
    memory: Vec<MemoryItem>,
    reasoning: Vec<ReasoningStep>,
    executions: Vec<ExecutionLogEntry>,
    vault_summary: String,
    pending_error: Option<PendingExecutionError>,
}

/// Process-local store. Every load hands out owned copies, so later edits
/// never reach a snapshot that already captured them.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(self, tasks: Vec<Task>) -> Self {
        self.state.write().tasks = tasks;
        self
    }

    pub fn with_goals(self, goals: Vec<Goal>) -> Self {
        self.state.write().goals = goals;
        self
    }

    pub fn with_memory(self, memory: Vec<MemoryItem>) -> Self {
        self.state.write().memory = memory;
        self
    }

    pub fn with_vault_summary(self, summary: impl Into<String>) -> Self {
        self.state.write().vault_summary = summary.into();
        self
    }

    pub fn set_tasks(&self, tasks: Vec<Task>) {
        self.state.write().tasks = tasks;
    }

    pub fn push_task(&self, task: Task) {
        self.state.write().tasks.push(task);
    }

    pub fn push_memory(&self, item: MemoryItem) {
        self.state.write().memory.push(item);
    }

    pub fn set_vault_summary(&self, summary: impl Into<String>) {
        self.state.write().vault_summary = summary.into();
    }

    pub fn pending_error(&self) -> Option<PendingExecutionError> {
        self.state.read().pending_error.clone()
    }

    pub fn reasoning_len(&self) -> usize {
        self.state.read().reasoning.len()
    }

    pub fn execution_len(&self) -> usize {
        self.state.read().executions.len()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.state.read().tasks.clone())
    }

    async fn load_goals(&self) -> Result<Vec<Goal>, StoreError> {
        Ok(self.state.read().goals.clone())
    }

    async fn load_memory(&self) -> Result<Vec<MemoryItem>, StoreError> {
        Ok(self.state.read().memory.clone())
    }

    async fn load_reasoning_log(&self) -> Result<Vec<ReasoningStep>, StoreError> {
        Ok(self.state.read().reasoning.clone())
    }

    async fn load_execution_log(&self) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        Ok(self.state.read().executions.clone())
    }

    async fn load_vault_summary(&self) -> Result<String, StoreError> {
        Ok(self.state.read().vault_summary.clone())
    }

    async fn load_pending_error(&self) -> Result<Option<PendingExecutionError>, StoreError> {
        Ok(self.state.read().pending_error.clone())
    }

    async fn save_pending_error(
        &self,
        record: Option<PendingExecutionError>,
    ) -> Result<(), StoreError> {
        self.state.write().pending_error = record;
        Ok(())
    }

    async fn save_reasoning_log(&self, entries: Vec<ReasoningStep>) -> Result<(), StoreError> {
        self.state.write().reasoning = entries;
        Ok(())
    }

    async fn save_execution_log(
        &self,
        entries: Vec<ExecutionLogEntry>,
    ) -> Result<(), StoreError> {
        self.state.write().executions = entries;
        Ok(())
    }

    async fn append_reasoning(&self, step: ReasoningStep) -> Result<(), StoreError> {
        self.state.write().reasoning.push(step);
        Ok(())
    }

    async fn append_execution(&self, entry: ExecutionLogEntry) -> Result<(), StoreError> {
        self.state.write().executions.push(entry);
        Ok(())
    }
}
