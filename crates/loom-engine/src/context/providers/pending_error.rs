use async_trait::async_trait;
use serde_json::Value;

use loom_core::{PendingExecutionError, ProviderError};

use crate::context::provider::{decode, encode, ContextProvider, ProviderContext, Rendered};

/// Fixed instruction block shown above a failed attempt.
pub const SELF_CORRECTION_INSTRUCTIONS: &str = "## Previous Execution Failed\n\
The code from your last attempt raised an error. If the error says something \
is not defined or was not found, fetch the referenced data again before \
using it. Otherwise fix the syntax or logic. Do not repeat the same code.";

/// Surfaces the last failed execution so the next attempt can correct it.
///
/// Renders nothing when no failure is pending; the section should be
/// configured with `includeWhenEmpty = false`.
pub struct PendingErrorProvider;

#[async_trait]
impl ContextProvider for PendingErrorProvider {
    fn id(&self) -> &str {
        "pendingError"
    }

    async fn collect(&self, ctx: &ProviderContext) -> Result<Value, ProviderError> {
        match ctx.snapshot.pending_error().await {
            Some(pending) => encode(pending),
            None => Ok(Value::Null),
        }
    }

    async fn format(&self, value: Value, _ctx: &ProviderContext) -> Result<Rendered, ProviderError> {
        if value.is_null() {
            return Ok(Rendered::Empty);
        }
        let pending: PendingExecutionError = decode(value)?;
        Ok(Rendered::Text(render(&pending)))
    }
}

fn render(pending: &PendingExecutionError) -> String {
    let mut error_block = pending.error_message.trim().to_string();
    if let Some(stack) = pending.stack.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        error_block.push('\n');
        error_block.push_str(stack);
    }

    let references = if pending.references.is_empty() {
        "(no external references captured)".to_string()
    } else {
        pending
            .references
            .iter()
            .map(|r| format!("- {r}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "{SELF_CORRECTION_INSTRUCTIONS}\n\n\
         ### Failed Code\n```\n{}\n```\n\n\
         ### Error\n```\n{error_block}\n```\n\n\
         ### References\n{references}\n\n\
         _Failed at {} during iteration {}._",
        pending.code.trim_end(),
        pending.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        pending.iteration,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::providers::test_support::{ctx, render as render_section};
    use crate::context::snapshot::SnapshotData;

    #[tokio::test]
    async fn absent_error_renders_nothing() {
        let ctx = ctx(SnapshotData::default());
        assert_eq!(render_section(&PendingErrorProvider, &ctx).await, "");
    }

    #[tokio::test]
    async fn renders_code_error_and_references() {
        let pending = PendingExecutionError::new("x()", "x is not defined", 3)
            .with_stack("at line 1")
            .with_references(vec!["vault:prices".into()]);
        let ctx = ctx(SnapshotData {
            pending_error: Some(pending),
            ..Default::default()
        });
        let out = render_section(&PendingErrorProvider, &ctx).await;
        assert!(out.starts_with(SELF_CORRECTION_INSTRUCTIONS));
        assert!(out.contains("### Failed Code\n```\nx()\n```"));
        assert!(out.contains("```\nx is not defined\nat line 1\n```"));
        assert!(out.contains("- vault:prices"));
        assert!(out.contains("during iteration 3._"));
    }

    #[tokio::test]
    async fn placeholder_without_references() {
        let ctx = ctx(SnapshotData {
            pending_error: Some(PendingExecutionError::new("y = ", "SyntaxError", 1)),
            ..Default::default()
        });
        let out = render_section(&PendingErrorProvider, &ctx).await;
        assert!(out.contains("(no external references captured)"));
    }
}
