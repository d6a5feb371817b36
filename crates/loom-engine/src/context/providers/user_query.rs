use async_trait::async_trait;
use serde_json::Value;

use loom_core::ProviderError;

use crate::context::provider::{ContextProvider, ProviderContext};

/// The user's query for this run, verbatim.
pub struct UserQueryProvider;

#[async_trait]
impl ContextProvider for UserQueryProvider {
    fn id(&self) -> &str {
        "userQuery"
    }

    async fn collect(&self, ctx: &ProviderContext) -> Result<Value, ProviderError> {
        Ok(Value::String(ctx.query.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::providers::test_support::{ctx, render};

    #[tokio::test]
    async fn renders_query() {
        let ctx = ctx(Default::default());
        assert_eq!(render(&UserQueryProvider, &ctx).await, "find X");
    }
}
