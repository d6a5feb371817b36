use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use loom_core::{ExecutionLogEntry, Goal, MemoryItem, PendingExecutionError, ReasoningStep, Task};
use loom_store::{StateStore, StoreError};

use super::compactor::{
    CompactionContext, CompactionReport, Compactor, SUMMARY_OPERATION, SUMMARY_SOURCE,
};

/// Everything one prompt build reads, owned outright.
#[derive(Clone, Debug, Default)]
pub struct SnapshotData {
    pub tasks: Vec<Task>,
    pub goals: Vec<Goal>,
    pub memory: Vec<MemoryItem>,
    pub reasoning_log: Vec<ReasoningStep>,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub vault_summary: String,
    pub pending_error: Option<PendingExecutionError>,
}

/// A single consistent read of every state source, taken once per build.
///
/// The first accessor (or an explicit [`capture`](Self::capture)) performs
/// the read; later accessors never touch the store again. Loaded records
/// are owned copies, so edits to the store after capture are invisible here.
pub struct StateSnapshot {
    store: Option<Arc<dyn StateStore>>,
    data: OnceCell<SnapshotData>,
}

impl StateSnapshot {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store: Some(store),
            data: OnceCell::new(),
        }
    }

    /// A snapshot that is already captured and has no backing store.
    pub fn from_data(data: SnapshotData) -> Self {
        Self {
            store: None,
            data: OnceCell::new_with(Some(data)),
        }
    }

    pub fn is_captured(&self) -> bool {
        self.data.initialized()
    }

    /// Read every source once. Concurrent callers share the same read.
    pub async fn capture(&self) -> &SnapshotData {
        self.data
            .get_or_init(|| async {
                match &self.store {
                    Some(store) => load_all(store.as_ref()).await,
                    None => SnapshotData::default(),
                }
            })
            .await
    }

    pub async fn tasks(&self) -> &[Task] {
        &self.capture().await.tasks
    }

    pub async fn goals(&self) -> &[Goal] {
        &self.capture().await.goals
    }

    pub async fn memory(&self) -> &[MemoryItem] {
        &self.capture().await.memory
    }

    pub async fn reasoning_log(&self) -> &[ReasoningStep] {
        &self.capture().await.reasoning_log
    }

    pub async fn execution_log(&self) -> &[ExecutionLogEntry] {
        &self.capture().await.execution_log
    }

    pub async fn vault_summary(&self) -> &str {
        &self.capture().await.vault_summary
    }

    pub async fn pending_error(&self) -> Option<&PendingExecutionError> {
        self.capture().await.pending_error.as_ref()
    }

    /// The last `limit` reasoning steps, oldest first. `0` means all. A
    /// leading compaction summary is kept ahead of the window so folded
    /// history stays visible.
    pub async fn recent_reasoning(&self, limit: usize) -> Vec<ReasoningStep> {
        window(self.reasoning_log().await, limit, |s| s.operation == SUMMARY_OPERATION)
    }

    /// The last `limit` execution entries, oldest first, with a leading
    /// compaction summary kept as for reasoning.
    pub async fn recent_executions(&self, limit: usize) -> Vec<ExecutionLogEntry> {
        window(self.execution_log().await, limit, |e| e.source == SUMMARY_SOURCE)
    }

    /// A named field as JSON. Unknown names yield `Value::Null`.
    pub async fn field(&self, name: &str) -> Value {
        let data = self.capture().await;
        let value = match name {
            "tasks" => serde_json::to_value(&data.tasks),
            "goals" => serde_json::to_value(&data.goals),
            "memory" => serde_json::to_value(&data.memory),
            "reasoningLog" => serde_json::to_value(&data.reasoning_log),
            "executionLog" => serde_json::to_value(&data.execution_log),
            "vaultSummary" => Ok(Value::String(data.vault_summary.clone())),
            "pendingError" => serde_json::to_value(&data.pending_error),
            _ => Ok(Value::Null),
        };
        value.unwrap_or_else(|e| {
            warn!(field = name, error = %e, "snapshot field failed to serialize");
            Value::Null
        })
    }

    /// A new, captured snapshot whose bounded lists went through `compactor`.
    pub async fn compacted(&self, compactor: &Compactor) -> (StateSnapshot, CompactionReport) {
        let data = self.capture().await.clone();
        let context = CompactionContext {
            reasoning_log: data.reasoning_log,
            execution_log: data.execution_log,
            memory: data.memory,
            vault_summary: data.vault_summary,
        };
        let (compacted, report) = compactor.compact(context);
        let snapshot = StateSnapshot::from_data(SnapshotData {
            tasks: data.tasks,
            goals: data.goals,
            memory: compacted.memory,
            reasoning_log: compacted.reasoning_log,
            execution_log: compacted.execution_log,
            vault_summary: compacted.vault_summary,
            pending_error: data.pending_error,
        });
        (snapshot, report)
    }
}

fn window<T: Clone>(items: &[T], limit: usize, is_summary: impl Fn(&T) -> bool) -> Vec<T> {
    if limit == 0 || limit >= items.len() {
        return items.to_vec();
    }
    let tail = &items[items.len() - limit..];
    match items.first() {
        Some(first) if is_summary(first) => std::iter::once(first).chain(tail).cloned().collect(),
        _ => tail.to_vec(),
    }
}

async fn load_all(store: &dyn StateStore) -> SnapshotData {
    let (tasks, goals, memory, reasoning_log, execution_log, vault_summary, pending_error) = tokio::join!(
        store.load_tasks(),
        store.load_goals(),
        store.load_memory(),
        store.load_reasoning_log(),
        store.load_execution_log(),
        store.load_vault_summary(),
        store.load_pending_error(),
    );

    let data = SnapshotData {
        tasks: or_empty("tasks", tasks),
        goals: or_empty("goals", goals),
        memory: or_empty("memory", memory),
        reasoning_log: or_empty("reasoningLog", reasoning_log),
        execution_log: or_empty("executionLog", execution_log),
        vault_summary: or_empty("vaultSummary", vault_summary),
        pending_error: or_empty("pendingError", pending_error),
    };
    debug!(
        tasks = data.tasks.len(),
        goals = data.goals.len(),
        memory = data.memory.len(),
        reasoning = data.reasoning_log.len(),
        executions = data.execution_log.len(),
        pending_error = data.pending_error.is_some(),
        "state snapshot captured"
    );
    data
}

fn or_empty<T: Default>(source: &str, result: Result<T, StoreError>) -> T {
    result.unwrap_or_else(|e| {
        warn!(source, error = %e, "state read failed, using empty value");
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loom_store::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn capture_is_isolated_from_later_edits() {
        let store = Arc::new(InMemoryStore::new().with_tasks(vec![Task::new("t1", "First")]));
        let snapshot = StateSnapshot::new(store.clone());
        snapshot.capture().await;

        store.push_task(Task::new("t2", "Second"));
        assert_eq!(snapshot.tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn accessors_capture_lazily() {
        let store = Arc::new(InMemoryStore::new().with_vault_summary("vault text"));
        let snapshot = StateSnapshot::new(store);
        assert!(!snapshot.is_captured());
        assert_eq!(snapshot.vault_summary().await, "vault text");
        assert!(snapshot.is_captured());
    }

    #[tokio::test]
    async fn recent_slices_are_suffixes() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..5 {
            store
                .append_reasoning(ReasoningStep::new(format!("step {i}")))
                .await
                .unwrap();
        }
        let snapshot = StateSnapshot::new(store);
        let recent = snapshot.recent_reasoning(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "step 3");
        assert_eq!(recent[1].content, "step 4");
        assert_eq!(snapshot.recent_reasoning(0).await.len(), 5);
        assert_eq!(snapshot.recent_reasoning(50).await.len(), 5);
    }

    #[tokio::test]
    async fn compaction_summary_survives_the_window() {
        let mut reasoning_log = vec![ReasoningStep::new("[Compacted 12 earlier reasoning steps]")
            .with_operation(SUMMARY_OPERATION)];
        reasoning_log.extend((0..4).map(|i| ReasoningStep::new(format!("step {i}"))));
        let mut execution_log = vec![ExecutionLogEntry::success(SUMMARY_SOURCE, "[Compacted 7]")];
        execution_log.extend((0..3).map(|i| ExecutionLogEntry::success("execution", format!("{i}"))));
        let snapshot = StateSnapshot::from_data(SnapshotData {
            reasoning_log,
            execution_log,
            ..Default::default()
        });

        let recent = snapshot.recent_reasoning(2).await;
        let contents: Vec<&str> = recent.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["[Compacted 12 earlier reasoning steps]", "step 2", "step 3"]
        );

        let recent = snapshot.recent_executions(1).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].source, SUMMARY_SOURCE);
        assert_eq!(recent[1].result.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn field_maps_names_to_json() {
        let store = Arc::new(InMemoryStore::new().with_tasks(vec![Task::new("t1", "First")]));
        let snapshot = StateSnapshot::new(store);
        let tasks = snapshot.field("tasks").await;
        assert_eq!(tasks[0]["identifier"], "t1");
        assert_eq!(snapshot.field("pendingError").await, Value::Null);
        assert_eq!(snapshot.field("nope").await, Value::Null);
    }

    struct CountingStore {
        inner: InMemoryStore,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl StateStore for CountingStore {
        async fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.load_tasks().await
        }
        async fn load_goals(&self) -> Result<Vec<Goal>, StoreError> {
            Err(StoreError::Backend("goals table locked".into()))
        }
        async fn load_memory(&self) -> Result<Vec<MemoryItem>, StoreError> {
            self.inner.load_memory().await
        }
        async fn load_reasoning_log(&self) -> Result<Vec<ReasoningStep>, StoreError> {
            self.inner.load_reasoning_log().await
        }
        async fn load_execution_log(&self) -> Result<Vec<ExecutionLogEntry>, StoreError> {
            self.inner.load_execution_log().await
        }
        async fn load_vault_summary(&self) -> Result<String, StoreError> {
            self.inner.load_vault_summary().await
        }
        async fn load_pending_error(&self) -> Result<Option<PendingExecutionError>, StoreError> {
            self.inner.load_pending_error().await
        }
        async fn save_pending_error(
            &self,
            record: Option<PendingExecutionError>,
        ) -> Result<(), StoreError> {
            self.inner.save_pending_error(record).await
        }
        async fn save_reasoning_log(&self, entries: Vec<ReasoningStep>) -> Result<(), StoreError> {
            self.inner.save_reasoning_log(entries).await
        }
        async fn save_execution_log(
            &self,
            entries: Vec<ExecutionLogEntry>,
        ) -> Result<(), StoreError> {
            self.inner.save_execution_log(entries).await
        }
        async fn append_reasoning(&self, step: ReasoningStep) -> Result<(), StoreError> {
            self.inner.append_reasoning(step).await
        }
        async fn append_execution(&self, entry: ExecutionLogEntry) -> Result<(), StoreError> {
            self.inner.append_execution(entry).await
        }
    }

    #[tokio::test]
    async fn store_is_read_once_and_failures_degrade() {
        let store = Arc::new(CountingStore {
            inner: InMemoryStore::new().with_tasks(vec![Task::new("t1", "First")]),
            reads: AtomicUsize::new(0),
        });
        let snapshot = StateSnapshot::new(store.clone());
        let _ = snapshot.tasks().await;
        let _ = snapshot.tasks().await;
        let _ = snapshot.field("tasks").await;
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
        assert!(snapshot.goals().await.is_empty());
    }

    #[tokio::test]
    async fn compacted_snapshot_bounds_lists() {
        let mut reasoning = Vec::new();
        for i in 0..30 {
            reasoning.push(ReasoningStep::new(format!("step {i}")));
        }
        let snapshot = StateSnapshot::from_data(SnapshotData {
            reasoning_log: reasoning,
            ..Default::default()
        });
        let compactor = Compactor::new(loom_settings::CompactionSettings::default());
        let (compacted, report) = snapshot.compacted(&compactor).await;
        let log = compacted.reasoning_log().await;
        assert_eq!(log.len(), 21);
        assert_eq!(log[0].operation, "summary");
        assert_eq!(log[20].content, "step 29");
        assert!(report.changed());
        assert_eq!(snapshot.reasoning_log().await.len(), 30);
    }
}
