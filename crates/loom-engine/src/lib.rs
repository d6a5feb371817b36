//! # loom-engine
//!
//! The orchestration core: per-build state snapshots, pluggable context
//! providers composed into an ordered prompt, history compaction, execution
//! policies with retry/timeout, and the iteration loop that feeds execution
//! failures back into the next prompt.

pub mod context;
pub mod error;
pub mod execution;
pub mod orchestrator;

pub use context::compactor::{CompactionContext, CompactionReport, Compactor, KeyOutcome};
pub use context::provider::{ContextProvider, ProviderContext, Rendered};
pub use context::registry::{default_registry, ProviderRegistry};
pub use context::snapshot::{SnapshotData, StateSnapshot};
pub use context::{BuildRequest, BuiltPrompt, ContextBuilder, SectionOutcome, SectionReport};
pub use error::{CompactionError, EngineError};
pub use execution::hooks::{ExecutionHooks, ReferenceInliner};
pub use execution::policy::{Backoff, ExecutionPolicy};
pub use execution::runner::{CodeRunner, ProcessRunner};
pub use execution::{execute, Executor};
pub use orchestrator::{record_execution, IterationLoop, LoopOutcome, ScriptedModel, StopReason};
