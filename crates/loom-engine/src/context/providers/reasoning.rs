use async_trait::async_trait;
use serde_json::Value;

use loom_core::{ProviderError, ReasoningStep};

use crate::context::provider::{decode, encode, ContextProvider, ProviderContext, Rendered};

const DEFAULT_OPERATION: &str = "reasoning";
const MAX_STEP_CHARS: usize = 2_000;

/// The most recent reasoning steps, numbered oldest first.
pub struct ReasoningProvider;

#[async_trait]
impl ContextProvider for ReasoningProvider {
    fn id(&self) -> &str {
        "reasoning"
    }

    async fn collect(&self, ctx: &ProviderContext) -> Result<Value, ProviderError> {
        encode(&ctx.snapshot.recent_reasoning(ctx.limits.reasoning_steps).await)
    }

    async fn format(&self, value: Value, _ctx: &ProviderContext) -> Result<Rendered, ProviderError> {
        let steps: Vec<ReasoningStep> = decode(value)?;
        Ok(Rendered::Lines(
            steps
                .iter()
                .enumerate()
                .map(|(i, step)| {
                    let content = super::truncate_chars(step.content.trim(), MAX_STEP_CHARS);
                    if step.operation == DEFAULT_OPERATION {
                        format!("{}. {content}", i + 1)
                    } else {
                        format!("{}. [{}] {content}", i + 1, step.operation)
                    }
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::providers::test_support::{ctx, render};
    use crate::context::snapshot::SnapshotData;

    #[tokio::test]
    async fn numbers_recent_steps() {
        let mut ctx = ctx(SnapshotData {
            reasoning_log: vec![
                ReasoningStep::new("dropped"),
                ReasoningStep::new("look at sheet"),
                ReasoningStep::new("fetched prices").with_operation("fetch"),
            ],
            ..Default::default()
        });
        ctx.limits.reasoning_steps = 2;
        assert_eq!(
            render(&ReasoningProvider, &ctx).await,
            "1. look at sheet\n2. [fetch] fetched prices"
        );
    }
}
