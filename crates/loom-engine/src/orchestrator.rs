//! The build, ask, execute, feed-back cycle.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use loom_core::{
    ExecutionLogEntry, ExecutionRequest, ExecutionResult, GoalEvaluator, ModelClient, ModelError,
    ModelReply, PendingExecutionError, ReasoningStep,
};
use loom_store::{StateStore, StoreError};

use crate::context::compactor::{CompactionContext, Compactor, KeyOutcome, EXECUTION_KEY, REASONING_KEY};
use crate::context::{BuildRequest, ContextBuilder};
use crate::error::EngineError;
use crate::execution::Executor;

/// Source tag for model failures in the execution log.
const MODEL_SOURCE: &str = "model";
/// Source tag for code runs in the execution log.
const EXECUTION_SOURCE: &str = "execution";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    GoalsComplete,
    MaxIterations,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopOutcome {
    pub iterations: u32,
    pub stop_reason: StopReason,
    /// The last prompt handed to the model.
    pub last_prompt: String,
}

/// Drives iterations until the goals are met or the iteration budget runs
/// out. A failed execution is saved as the pending error and shows up in
/// the next iteration's prompt.
pub struct IterationLoop {
    builder: ContextBuilder,
    model: Arc<dyn ModelClient>,
    executor: Executor,
    store: Arc<dyn StateStore>,
    compactor: Option<Arc<Compactor>>,
    goals: Arc<dyn GoalEvaluator>,
    max_iterations: u32,
}

impl IterationLoop {
    pub fn new(
        builder: ContextBuilder,
        model: Arc<dyn ModelClient>,
        executor: Executor,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            builder,
            model,
            executor,
            store,
            compactor: None,
            goals: Arc::new(|| false),
            max_iterations: 10,
        }
    }

    /// Compacted logs are written back after each iteration when the
    /// compactor's settings enable persistence.
    pub fn with_compactor(mut self, compactor: Arc<Compactor>) -> Self {
        self.compactor = Some(compactor);
        self
    }

    pub fn with_goals(mut self, goals: Arc<dyn GoalEvaluator>) -> Self {
        self.goals = goals;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    #[instrument(skip_all, fields(model = self.model.name(), max_iterations = self.max_iterations))]
    pub async fn run(&self, query: &str) -> Result<LoopOutcome, EngineError> {
        let mut last_prompt = String::new();

        for iteration in 1..=self.max_iterations {
            let built = self
                .builder
                .build_prompt(&BuildRequest::new(query, iteration, self.max_iterations))
                .await;
            debug!(
                iteration,
                prompt_len = built.prompt.len(),
                pending_error = built.pending_error_consumed,
                "prompt built"
            );
            last_prompt = built.prompt;

            match self.model.complete(&last_prompt).await {
                Ok(reply) => self.handle_reply(reply, iteration).await?,
                Err(error) => {
                    warn!(iteration, error = %error, "model request failed");
                    self.store
                        .append_execution(ExecutionLogEntry::failure(MODEL_SOURCE, error.to_string()))
                        .await?;
                }
            }

            self.persist_compaction(iteration).await;

            if self.goals.are_goals_complete() {
                info!(iteration, "goals complete");
                return Ok(LoopOutcome {
                    iterations: iteration,
                    stop_reason: StopReason::GoalsComplete,
                    last_prompt,
                });
            }
        }

        info!(iterations = self.max_iterations, "iteration budget exhausted");
        Ok(LoopOutcome {
            iterations: self.max_iterations,
            stop_reason: StopReason::MaxIterations,
            last_prompt,
        })
    }

    async fn handle_reply(&self, reply: ModelReply, iteration: u32) -> Result<(), EngineError> {
        let code = reply.code.filter(|c| !c.trim().is_empty());
        if !reply.reasoning.trim().is_empty() {
            let mut step = ReasoningStep::new(reply.reasoning);
            if code.is_some() {
                step = step.with_operation("execute");
            }
            self.store.append_reasoning(step).await?;
        }

        let Some(code) = code else {
            return Ok(());
        };
        let request = ExecutionRequest::new(code).with_references(reply.references);
        let result = self.executor.execute(request).await?;
        record_execution(self.store.as_ref(), result, iteration).await?;
        Ok(())
    }

    /// Write compacted logs back. Failures are logged and the stored logs
    /// are left as they were until the next iteration tries again.
    async fn persist_compaction(&self, iteration: u32) {
        let Some(compactor) = &self.compactor else {
            return;
        };
        let settings = compactor.settings();
        if !settings.enabled || !settings.persist {
            return;
        }
        if let Err(error) = self.try_persist_compaction(compactor).await {
            warn!(iteration, error = %error, "compaction not persisted");
        }
    }

    async fn try_persist_compaction(&self, compactor: &Compactor) -> Result<(), StoreError> {
        let context = CompactionContext {
            reasoning_log: self.store.load_reasoning_log().await?,
            execution_log: self.store.load_execution_log().await?,
            ..Default::default()
        };
        let (compacted, report) = compactor.compact(context);
        if matches!(report.outcome(REASONING_KEY), Some(KeyOutcome::Compacted { .. })) {
            self.store.save_reasoning_log(compacted.reasoning_log).await?;
        }
        if matches!(report.outcome(EXECUTION_KEY), Some(KeyOutcome::Compacted { .. })) {
            self.store.save_execution_log(compacted.execution_log).await?;
        }
        Ok(())
    }
}

/// Append `result` to the execution log and, when it failed, save it as the
/// pending error for the next prompt.
pub async fn record_execution(
    store: &dyn StateStore,
    result: ExecutionResult,
    iteration: u32,
) -> Result<(), StoreError> {
    if result.success {
        let text = result.value_text().unwrap_or_default();
        return store
            .append_execution(ExecutionLogEntry::success(EXECUTION_SOURCE, text))
            .await;
    }

    let Some(error) = result.error else {
        return Ok(());
    };
    store
        .append_execution(ExecutionLogEntry::failure(EXECUTION_SOURCE, error.to_string()))
        .await?;

    let mut pending = PendingExecutionError::new(result.request.code, error.to_string(), iteration)
        .with_references(result.request.references);
    if let Some(stack) = error.stack() {
        pending = pending.with_stack(stack);
    }
    info!(
        iteration,
        error_kind = error.error_kind(),
        "execution failed, error saved for next prompt"
    );
    store.save_pending_error(Some(pending)).await
}

/// A model that replays a fixed list of replies and records every prompt
/// it was given.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ModelReply, ModelError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ModelReply>) -> Self {
        Self::from_results(replies.into_iter().map(Ok).collect())
    }

    pub fn from_results(replies: Vec<Result<ModelReply, ModelError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<ModelReply, ModelError> {
        self.prompts.lock().push(prompt.to_string());
        self.replies.lock().pop_front().unwrap_or(Err(ModelError::Exhausted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use loom_core::{Goal, MemoryItem, Task};
    use loom_settings::{CompactionSettings, ContextSettings};
    use loom_store::InMemoryStore;

    use crate::context::registry::default_registry;
    use crate::execution::policy::ExecutionPolicy;
    use crate::execution::runner::ProcessRunner;

    fn iteration_loop(store: Arc<InMemoryStore>, model: Arc<ScriptedModel>) -> IterationLoop {
        let builder = ContextBuilder::new(
            Arc::new(default_registry()),
            store.clone(),
            ContextSettings::default(),
        );
        let executor = Executor::new(ExecutionPolicy::direct(), Arc::new(ProcessRunner::default()));
        IterationLoop::new(builder, model, executor, store)
    }

    #[tokio::test]
    async fn runs_to_max_iterations() {
        let store = Arc::new(InMemoryStore::new());
        let model = Arc::new(ScriptedModel::new(vec![
            ModelReply::reasoning("look around"),
            ModelReply::reasoning("still looking"),
        ]));
        let outcome = iteration_loop(store.clone(), model.clone())
            .with_max_iterations(2)
            .run("find X")
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.stop_reason, StopReason::MaxIterations);
        assert_eq!(store.reasoning_len(), 2);
        assert_eq!(model.call_count(), 2);
        assert!(model.prompts()[1].contains("1. look around"));
    }

    #[tokio::test]
    async fn stops_when_goals_complete() {
        let store = Arc::new(InMemoryStore::new());
        let model = Arc::new(ScriptedModel::new(vec![]));
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = checks.clone();
        let outcome = iteration_loop(store, model)
            .with_max_iterations(5)
            .with_goals(Arc::new(move || counter.fetch_add(1, Ordering::SeqCst) >= 1))
            .run("q")
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.stop_reason, StopReason::GoalsComplete);
        assert_eq!(checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn model_errors_are_logged_and_loop_continues() {
        let store = Arc::new(InMemoryStore::new());
        let model = Arc::new(ScriptedModel::from_results(vec![
            Err(ModelError::Request("rate limited".into())),
            Ok(ModelReply::reasoning("recovered")),
        ]));
        let outcome = iteration_loop(store.clone(), model)
            .with_max_iterations(2)
            .run("q")
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 2);
        let log = store.load_execution_log().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].source, "model");
        assert!(!log[0].success);
        assert_eq!(store.reasoning_len(), 1);
    }

    #[tokio::test]
    async fn failed_code_becomes_pending_error() {
        let store = Arc::new(InMemoryStore::new());
        let model = Arc::new(ScriptedModel::new(vec![ModelReply::reasoning("try it")
            .with_code("echo 'oops: not found' >&2; exit 1")]));
        iteration_loop(store.clone(), model)
            .with_max_iterations(1)
            .run("q")
            .await
            .unwrap();
        let pending = store.pending_error().unwrap();
        assert_eq!(pending.error_message, "oops: not found");
        assert_eq!(pending.iteration, 1);
        assert_eq!(pending.stack.as_deref(), Some("oops: not found"));
        let reasoning = store.load_reasoning_log().await.unwrap();
        assert_eq!(reasoning[0].operation, "execute");
    }

    #[tokio::test]
    async fn persisted_compaction_bounds_stored_logs() {
        let store = Arc::new(InMemoryStore::new());
        let replies = (0..6).map(|i| ModelReply::reasoning(format!("step {i}"))).collect();
        let model = Arc::new(ScriptedModel::new(replies));
        let compactor = Arc::new(Compactor::new(CompactionSettings {
            max_reasoning_steps: 3,
            ..Default::default()
        }));
        iteration_loop(store.clone(), model)
            .with_compactor(compactor)
            .with_max_iterations(6)
            .run("q")
            .await
            .unwrap();
        let log = store.load_reasoning_log().await.unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0].operation, "summary");
        assert!(log[0].content.starts_with("[Compacted 3 earlier reasoning steps"));
        assert_eq!(log[3].content, "step 5");
    }

    /// Delegates to an in-memory store but cannot read the reasoning log.
    struct UnreadableReasoning {
        inner: InMemoryStore,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl StateStore for UnreadableReasoning {
        async fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
            self.inner.load_tasks().await
        }
        async fn load_goals(&self) -> Result<Vec<Goal>, StoreError> {
            self.inner.load_goals().await
        }
        async fn load_memory(&self) -> Result<Vec<MemoryItem>, StoreError> {
            self.inner.load_memory().await
        }
        async fn load_reasoning_log(&self) -> Result<Vec<ReasoningStep>, StoreError> {
            Err(StoreError::Backend("transient".into()))
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
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save_reasoning_log(entries).await
        }
        async fn save_execution_log(
            &self,
            entries: Vec<ExecutionLogEntry>,
        ) -> Result<(), StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
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
    async fn unreadable_log_skips_compaction_without_stopping() {
        let store = Arc::new(UnreadableReasoning {
            inner: InMemoryStore::new(),
            saves: AtomicUsize::new(0),
        });
        let model = Arc::new(ScriptedModel::new(vec![
            ModelReply::reasoning("first"),
            ModelReply::reasoning("second"),
        ]));
        let builder = ContextBuilder::new(
            Arc::new(default_registry()),
            store.clone(),
            ContextSettings::default(),
        );
        let executor = Executor::new(ExecutionPolicy::direct(), Arc::new(ProcessRunner::default()));
        let compactor = Arc::new(Compactor::new(CompactionSettings {
            max_reasoning_steps: 1,
            ..Default::default()
        }));

        let outcome = IterationLoop::new(builder, model.clone(), executor, store.clone())
            .with_compactor(compactor)
            .with_max_iterations(2)
            .run("q")
            .await
            .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::MaxIterations);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(model.call_count(), 2);
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
        assert_eq!(store.inner.reasoning_len(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_reports_error() {
        let model = ScriptedModel::new(vec![]);
        assert!(matches!(model.complete("p").await, Err(ModelError::Exhausted)));
        assert_eq!(model.prompts(), vec!["p".to_string()]);
    }
}
