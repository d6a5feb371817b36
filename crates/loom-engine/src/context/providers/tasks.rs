use async_trait::async_trait;
use serde_json::Value;

use loom_core::{ProviderError, Task};

use crate::context::provider::{decode, ContextProvider, ProviderContext, Rendered};

/// Task list with status checkboxes.
pub struct TasksProvider;

#[async_trait]
impl ContextProvider for TasksProvider {
    fn id(&self) -> &str {
        "tasks"
    }

    async fn format(&self, value: Value, _ctx: &ProviderContext) -> Result<Rendered, ProviderError> {
        let tasks: Vec<Task> = decode(value)?;
        Ok(Rendered::Lines(tasks.iter().map(render_task).collect()))
    }
}

fn render_task(task: &Task) -> String {
    let mark = if task.status.is_done() { "x" } else { " " };
    let mut line = format!(
        "- [{mark}] {} ({}, {})",
        task.heading, task.identifier, task.status
    );
    if !task.content.trim().is_empty() {
        line.push_str(&format!(": {}", task.content.trim()));
    }
    if let Some(notes) = task.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        line.push_str(&format!("\n  Notes: {}", notes.trim()));
    }
    line
}
