//! Built-in context providers, one per concern.

mod executions;
mod goals;
mod iteration;
mod memory;
mod pending_error;
mod reasoning;
mod task_progress;
mod tasks;
mod user_query;
mod vault;

use std::sync::Arc;

pub use executions::ExecutionsProvider;
pub use goals::GoalsProvider;
pub use iteration::IterationProvider;
pub use memory::MemoryProvider;
pub use pending_error::{PendingErrorProvider, SELF_CORRECTION_INSTRUCTIONS};
pub use reasoning::ReasoningProvider;
pub use task_progress::TaskProgressProvider;
pub use tasks::TasksProvider;
pub use user_query::UserQueryProvider;
pub use vault::VaultProvider;

use super::provider::ContextProvider;

pub(crate) fn builtin() -> Vec<Arc<dyn ContextProvider>> {
    vec![
        Arc::new(PendingErrorProvider),
        Arc::new(UserQueryProvider),
        Arc::new(GoalsProvider),
        Arc::new(TasksProvider),
        Arc::new(TaskProgressProvider),
        Arc::new(MemoryProvider),
        Arc::new(ReasoningProvider),
        Arc::new(ExecutionsProvider),
        Arc::new(VaultProvider),
        Arc::new(IterationProvider),
    ]
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((boundary, _)) => format!(
            "{}… [truncated: {} chars]",
            &text[..boundary],
            text.chars().count()
        ),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let out = truncate_chars("ééééé", 2);
        assert!(out.starts_with("éé…"));
        assert!(out.ends_with("[truncated: 5 chars]"));
    }
}
