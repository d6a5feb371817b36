pub mod errors;
pub mod execution;
pub mod goals;
pub mod ids;
pub mod model;
pub mod records;
pub mod section;

pub use errors::{ConfigError, ExecutionError, ModelError, ProviderError};
pub use execution::{AttemptRecord, ExecutionRequest, ExecutionResult, StrategyMetadata};
pub use goals::GoalEvaluator;
pub use ids::ExecutionId;
pub use model::{ModelClient, ModelReply};
pub use records::{
    ExecutionLogEntry, Goal, MemoryItem, PendingExecutionError, ReasoningStep, Task, TaskStatus,
};
pub use section::ContextSection;
