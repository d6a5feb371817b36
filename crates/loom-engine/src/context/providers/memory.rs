use async_trait::async_trait;
use serde_json::Value;

use loom_core::{MemoryItem, ProviderError};

use crate::context::compactor::select_memory;
use crate::context::provider::{decode, encode, ContextProvider, ProviderContext, Rendered};

/// Memory items: every important item plus the most recent regular ones,
/// bounded by `limits.memory_items`.
pub struct MemoryProvider;

#[async_trait]
impl ContextProvider for MemoryProvider {
    fn id(&self) -> &str {
        "memory"
    }

    async fn collect(&self, ctx: &ProviderContext) -> Result<Value, ProviderError> {
        let memory = ctx.snapshot.memory().await;
        let selected = if ctx.limits.memory_items == 0 {
            memory.to_vec()
        } else {
            select_memory(memory, ctx.limits.memory_items)
        };
        encode(&selected)
    }

    async fn format(&self, value: Value, _ctx: &ProviderContext) -> Result<Rendered, ProviderError> {
        let items: Vec<MemoryItem> = decode(value)?;
        Ok(Rendered::Lines(
            items
                .iter()
                .map(|m| {
                    let flag = if m.important { " [important]" } else { "" };
                    format!("- {}{flag}: {}", m.heading, m.content.trim())
                })
                .collect(),
        ))
    }
}
