use async_trait::async_trait;
use serde_json::Value;

use loom_core::ProviderError;

use crate::context::provider::{ContextProvider, ProviderContext};

pub struct VaultProvider;

#[async_trait]
impl ContextProvider for VaultProvider {
    fn id(&self) -> &str {
        "vault"
    }

    async fn collect(&self, ctx: &ProviderContext) -> Result<Value, ProviderError> {
        Ok(Value::String(ctx.snapshot.vault_summary().await.to_string()))
    }
}
