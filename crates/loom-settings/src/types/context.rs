//! Prompt assembly and compaction settings.

use loom_core::ContextSection;
use serde::{Deserialize, Serialize};

/// How the prompt is assembled.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// System preamble placed first in every prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Optional heading placed above the section bodies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    /// Separator between section blocks.
    pub joiner: String,
    /// Progress marker; `{iteration}` and `{maxIterations}` are substituted.
    pub iteration_template: String,
    /// Separator placed before trailing instructions.
    pub instructions_separator: String,
    /// Trailing task instructions appended to every prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Windowing limits used by providers.
    pub limits: ContextLimits,
    /// Ordered section list. Order here is the order of the prompt.
    pub sections: Vec<ContextSection>,
    /// Clear the pending-error slot once a prompt has surfaced it.
    pub clear_pending_after_build: bool,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            system_prompt: None,
            heading: None,
            joiner: "\n\n".to_string(),
            iteration_template: "Iteration {iteration} of {maxIterations}".to_string(),
            instructions_separator: "\n\n---\n\n".to_string(),
            instructions: None,
            limits: ContextLimits::default(),
            sections: default_sections(),
            clear_pending_after_build: true,
        }
    }
}

/// How many recent entries providers render.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextLimits {
    pub reasoning_steps: usize,
    pub executions: usize,
    pub memory_items: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            reasoning_steps: 10,
            executions: 5,
            memory_items: 20,
        }
    }
}

/// The default section list, highest priority first.
pub fn default_sections() -> Vec<ContextSection> {
    vec![
        ContextSection::new("pending_error", "pendingError").omit_when_empty(),
        ContextSection::new("query", "userQuery").heading("## User Query"),
        ContextSection::new("goals", "goals")
            .heading("## Goals")
            .fallback("No goals defined."),
        ContextSection::new("tasks", "tasks")
            .heading("## Tasks")
            .fallback("No tasks."),
        ContextSection::new("progress", "taskProgress").omit_when_empty(),
        ContextSection::new("memory", "memory")
            .heading("## Memory")
            .fallback("Memory is empty."),
        ContextSection::new("reasoning", "reasoning")
            .heading("## Recent Reasoning")
            .fallback("No reasoning yet."),
        ContextSection::new("executions", "executions")
            .heading("## Recent Executions")
            .fallback("No executions yet."),
        ContextSection::new("vault", "vault")
            .heading("## Vault")
            .omit_when_empty(),
    ]
}

/// Context compaction settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionSettings {
    pub enabled: bool,
    pub max_reasoning_steps: usize,
    /// Replace the discarded reasoning prefix with one summary record.
    pub summarize_old_steps: bool,
    pub max_execution_entries: usize,
    pub summarize_old_executions: bool,
    pub max_memory_items: usize,
    /// Vault summaries longer than this get an annotation (never truncated).
    pub max_vault_summary_chars: usize,
    /// Write compacted logs back to the store after each iteration.
    pub persist: bool,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_reasoning_steps: 20,
            summarize_old_steps: true,
            max_execution_entries: 10,
            summarize_old_executions: true,
            max_memory_items: 50,
            max_vault_summary_chars: 4000,
            persist: true,
        }
    }
}
