use async_trait::async_trait;
use serde_json::{json, Value};

use loom_core::ProviderError;

use crate::context::provider::{ContextProvider, ProviderContext, Rendered};

/// Iteration budget, for section lists that want it inline rather than in
/// the trailing marker.
pub struct IterationProvider;

#[async_trait]
impl ContextProvider for IterationProvider {
    fn id(&self) -> &str {
        "iteration"
    }

    async fn collect(&self, ctx: &ProviderContext) -> Result<Value, ProviderError> {
        Ok(json!({
            "iteration": ctx.iteration,
            "maxIterations": ctx.max_iterations,
        }))
    }

    async fn format(&self, value: Value, _ctx: &ProviderContext) -> Result<Rendered, ProviderError> {
        let iteration = value["iteration"].as_u64().unwrap_or_default();
        let max = value["maxIterations"].as_u64().unwrap_or_default();
        let remaining = max.saturating_sub(iteration);
        Ok(Rendered::Text(format!(
            "Iteration {iteration} of {max} ({remaining} remaining)"
        )))
    }
}
