use async_trait::async_trait;
use serde_json::{json, Value};

use loom_core::{ProviderError, TaskStatus};

use crate::context::provider::{ContextProvider, ProviderContext, Rendered};

/// One-line completion summary of the task list. Empty when there are no
/// tasks.
pub struct TaskProgressProvider;

#[async_trait]
impl ContextProvider for TaskProgressProvider {
    fn id(&self) -> &str {
        "taskProgress"
    }

    async fn collect(&self, ctx: &ProviderContext) -> Result<Value, ProviderError> {
        let tasks = ctx.snapshot.tasks().await;
        if tasks.is_empty() {
            return Ok(Value::Null);
        }
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        Ok(json!({
            "total": tasks.len(),
            "done": count(TaskStatus::Done),
            "inProgress": count(TaskStatus::InProgress),
            "blocked": count(TaskStatus::Blocked),
        }))
    }

    async fn format(&self, value: Value, _ctx: &ProviderContext) -> Result<Rendered, ProviderError> {
        let Some(total) = value["total"].as_u64().filter(|t| *t > 0) else {
            return Ok(Rendered::Empty);
        };
        let done = value["done"].as_u64().unwrap_or_default();
        let in_progress = value["inProgress"].as_u64().unwrap_or_default();
        let blocked = value["blocked"].as_u64().unwrap_or_default();
        let pct = done * 100 / total;

        let mut line = format!("Progress: {done}/{total} tasks done ({pct}%)");
        if in_progress > 0 {
            line.push_str(&format!(", {in_progress} in progress"));
        }
        if blocked > 0 {
            line.push_str(&format!(", {blocked} blocked"));
        }
        Ok(Rendered::Text(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::providers::test_support::{ctx, render};
    use crate::context::snapshot::SnapshotData;
    use loom_core::Task;

    #[tokio::test]
    async fn summarises_counts() {
        let ctx = ctx(SnapshotData {
            tasks: vec![
                Task::new("a", "A").with_status(TaskStatus::Done),
                Task::new("b", "B").with_status(TaskStatus::InProgress),
                Task::new("c", "C").with_status(TaskStatus::Blocked),
                Task::new("d", "D"),
            ],
            ..Default::default()
        });
        assert_eq!(
            render(&TaskProgressProvider, &ctx).await,
            "Progress: 1/4 tasks done (25%), 1 in progress, 1 blocked"
        );
    }

    #[tokio::test]
    async fn empty_without_tasks() {
        let ctx = ctx(SnapshotData::default());
        assert_eq!(render(&TaskProgressProvider, &ctx).await, "");
    }
}
