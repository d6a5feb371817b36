use async_trait::async_trait;
use serde_json::Value;

use loom_core::{ExecutionLogEntry, ProviderError};

use crate::context::provider::{decode, encode, ContextProvider, ProviderContext, Rendered};

const MAX_OUTPUT_CHARS: usize = 1_000;

/// The most recent execution outcomes.
pub struct ExecutionsProvider;

#[async_trait]
impl ContextProvider for ExecutionsProvider {
    fn id(&self) -> &str {
        "executions"
    }

    async fn collect(&self, ctx: &ProviderContext) -> Result<Value, ProviderError> {
        encode(&ctx.snapshot.recent_executions(ctx.limits.executions).await)
    }

    async fn format(&self, value: Value, _ctx: &ProviderContext) -> Result<Rendered, ProviderError> {
        let entries: Vec<ExecutionLogEntry> = decode(value)?;
        Ok(Rendered::Lines(entries.iter().map(render_entry).collect()))
    }
}

fn render_entry(entry: &ExecutionLogEntry) -> String {
    let status = if entry.success { "ok" } else { "failed" };
    let detail = if entry.success {
        entry.result.as_deref()
    } else {
        entry.error.as_deref()
    }
    .map(str::trim)
    .filter(|d| !d.is_empty())
    .map(|d| super::truncate_chars(d, MAX_OUTPUT_CHARS));

    let time = entry.timestamp.format("%H:%M:%S");
    match detail {
        Some(detail) => format!("- [{status}] {} at {time}: {detail}", entry.source),
        None => format!("- [{status}] {} at {time}", entry.source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::providers::test_support::{ctx, render};
    use crate::context::snapshot::SnapshotData;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn renders_success_and_failure() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        let ctx = ctx(SnapshotData {
            execution_log: vec![
                ExecutionLogEntry::success("runner", "42").at(ts),
                ExecutionLogEntry::failure("runner", "x is not defined").at(ts),
                ExecutionLogEntry::success("runner", "").at(ts),
            ],
            ..Default::default()
        });
        assert_eq!(
            render(&ExecutionsProvider, &ctx).await,
            "- [ok] runner at 09:30:00: 42\n- [failed] runner at 09:30:00: x is not defined\n- [ok] runner at 09:30:00"
        );
    }
}
