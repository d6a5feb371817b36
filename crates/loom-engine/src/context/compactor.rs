//! Bounds the growing lists of the loop's state.
//!
//! Each strategy owns one named key and runs on a working copy of the
//! context. A strategy that fails or panics has its copy discarded, so the
//! key keeps its pre-compaction value.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

use loom_core::{ExecutionLogEntry, MemoryItem, ReasoningStep};
use loom_settings::CompactionSettings;

use crate::error::{panic_message, CompactionError};

pub const REASONING_KEY: &str = "reasoningLog";
pub const EXECUTION_KEY: &str = "executionLog";
pub const MEMORY_KEY: &str = "memory";
pub const VAULT_KEY: &str = "vault";

/// Operation tag of synthetic reasoning summaries.
pub const SUMMARY_OPERATION: &str = "summary";
/// Source tag of synthetic execution summaries.
pub const SUMMARY_SOURCE: &str = "compactor";

const VAULT_NOTE_PREFIX: &str = "[Vault summary is";

static REASONING_SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[Compacted (\d+) earlier reasoning steps since \S+\. Operations: (.*)\]$")
        .expect("valid reasoning summary regex")
});

static EXECUTION_SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[Compacted (\d+) earlier executions since \S+: (\d+) succeeded, (\d+) failed\]$")
        .expect("valid execution summary regex")
});

/// The lists a compactor operates on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompactionContext {
    pub reasoning_log: Vec<ReasoningStep>,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub memory: Vec<MemoryItem>,
    pub vault_summary: String,
}

/// What a strategy did to its key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyOutcome {
    Unchanged,
    Compacted { before: usize, after: usize },
    Failed { error: String },
    Disabled,
}

/// Per-key outcomes of one [`Compactor::compact`] call, in strategy order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub outcomes: Vec<(String, KeyOutcome)>,
}

impl CompactionReport {
    pub fn outcome(&self, key: &str) -> Option<&KeyOutcome> {
        self.outcomes.iter().find(|(k, _)| k == key).map(|(_, o)| o)
    }

    pub fn changed(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, o)| matches!(o, KeyOutcome::Compacted { .. }))
    }
}

pub type StrategyFn = Arc<
    dyn Fn(&mut CompactionContext, &CompactionSettings) -> Result<KeyOutcome, CompactionError>
        + Send
        + Sync,
>;

struct StrategyEntry {
    name: String,
    strategy: StrategyFn,
    enabled: bool,
}

pub struct Compactor {
    settings: CompactionSettings,
    strategies: Vec<StrategyEntry>,
}

impl Compactor {
    /// A compactor with the four built-in strategies registered.
    pub fn new(settings: CompactionSettings) -> Self {
        let mut compactor = Self {
            settings,
            strategies: Vec::new(),
        };
        compactor.register_strategy(REASONING_KEY, Arc::new(compact_reasoning), true);
        compactor.register_strategy(EXECUTION_KEY, Arc::new(compact_executions), true);
        compactor.register_strategy(MEMORY_KEY, Arc::new(compact_memory), true);
        compactor.register_strategy(VAULT_KEY, Arc::new(annotate_vault), true);
        compactor
    }

    pub fn settings(&self) -> &CompactionSettings {
        &self.settings
    }

    /// Add a strategy, or replace the one already registered under `name`
    /// (keeping its position).
    pub fn register_strategy(&mut self, name: impl Into<String>, strategy: StrategyFn, enabled: bool) {
        let name = name.into();
        if let Some(entry) = self.strategies.iter_mut().find(|e| e.name == name) {
            entry.strategy = strategy;
            entry.enabled = enabled;
        } else {
            self.strategies.push(StrategyEntry {
                name,
                strategy,
                enabled,
            });
        }
    }

    /// Toggle a strategy. Returns false if none is registered under `name`.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.strategies.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn compact(&self, context: CompactionContext) -> (CompactionContext, CompactionReport) {
        let mut current = context;
        let mut report = CompactionReport::default();

        for entry in &self.strategies {
            if !self.settings.enabled || !entry.enabled {
                report.outcomes.push((entry.name.clone(), KeyOutcome::Disabled));
                continue;
            }

            let mut working = current.clone();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                (entry.strategy)(&mut working, &self.settings)
            }))
            .unwrap_or_else(|panic| {
                Err(CompactionError::Panicked(
                    entry.name.clone(),
                    panic_message(&panic),
                ))
            });

            let outcome = match result {
                Ok(outcome) => {
                    current = working;
                    outcome
                }
                Err(e) => {
                    warn!(key = %entry.name, error = %e, "compaction strategy failed, key left unmodified");
                    KeyOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            if let KeyOutcome::Compacted { before, after } = &outcome {
                debug!(key = %entry.name, before, after, "compacted");
            }
            report.outcomes.push((entry.name.clone(), outcome));
        }

        (current, report)
    }
}

// ── Built-in strategies ─────────────────────────────────────────────────────

fn compact_reasoning(
    ctx: &mut CompactionContext,
    settings: &CompactionSettings,
) -> Result<KeyOutcome, CompactionError> {
    let max = settings.max_reasoning_steps;
    let before = ctx.reasoning_log.len();
    let (prior, body) = split_leading(&ctx.reasoning_log, |s| s.operation == SUMMARY_OPERATION);
    if body.len() <= max {
        return Ok(KeyOutcome::Unchanged);
    }

    let cut = body.len() - max;
    let (discarded, kept) = body.split_at(cut);
    let mut out = Vec::with_capacity(max + 1);

    if settings.summarize_old_steps {
        let mut count = discarded.len();
        let mut operations: BTreeMap<String, usize> = BTreeMap::new();
        let mut earliest = discarded.iter().map(|s| s.timestamp).min();

        if let Some(summary) = prior {
            let (n, ops) = parse_reasoning_summary(&summary.content).ok_or_else(|| {
                CompactionError::Strategy {
                    key: REASONING_KEY.into(),
                    message: "unrecognised summary record".into(),
                }
            })?;
            count += n;
            for (op, c) in ops {
                *operations.entry(op).or_default() += c;
            }
            earliest = earliest.min(Some(summary.timestamp)).or(Some(summary.timestamp));
        }
        for step in discarded {
            *operations.entry(operation_label(&step.operation)).or_default() += 1;
        }

        let earliest = earliest.unwrap_or_else(Utc::now);
        let ops = operations
            .iter()
            .map(|(op, c)| format!("{op}×{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        out.push(
            ReasoningStep::new(format!(
                "[Compacted {count} earlier reasoning steps since {}. Operations: {ops}]",
                timestamp_label(earliest)
            ))
            .with_operation(SUMMARY_OPERATION)
            .at(earliest),
        );
    }
    out.extend_from_slice(kept);

    ctx.reasoning_log = out;
    Ok(KeyOutcome::Compacted {
        before,
        after: ctx.reasoning_log.len(),
    })
}

fn compact_executions(
    ctx: &mut CompactionContext,
    settings: &CompactionSettings,
) -> Result<KeyOutcome, CompactionError> {
    let max = settings.max_execution_entries;
    let before = ctx.execution_log.len();
    let (prior, body) = split_leading(&ctx.execution_log, |e| e.source == SUMMARY_SOURCE);
    if body.len() <= max {
        return Ok(KeyOutcome::Unchanged);
    }

    let cut = body.len() - max;
    let (discarded, kept) = body.split_at(cut);
    let mut out = Vec::with_capacity(max + 1);

    if settings.summarize_old_executions {
        let mut count = discarded.len();
        let mut succeeded = discarded.iter().filter(|e| e.success).count();
        let mut failed = count - succeeded;
        let mut earliest = discarded.iter().map(|e| e.timestamp).min();

        if let Some(summary) = prior {
            let text = summary.result.as_deref().unwrap_or_default();
            let (n, ok, bad) =
                parse_execution_summary(text).ok_or_else(|| CompactionError::Strategy {
                    key: EXECUTION_KEY.into(),
                    message: "unrecognised summary record".into(),
                })?;
            count += n;
            succeeded += ok;
            failed += bad;
            earliest = earliest.min(Some(summary.timestamp)).or(Some(summary.timestamp));
        }

        let earliest = earliest.unwrap_or_else(Utc::now);
        out.push(
            ExecutionLogEntry::success(
                SUMMARY_SOURCE,
                format!(
                    "[Compacted {count} earlier executions since {}: {succeeded} succeeded, {failed} failed]",
                    timestamp_label(earliest)
                ),
            )
            .at(earliest),
        );
    }
    out.extend_from_slice(kept);

    ctx.execution_log = out;
    Ok(KeyOutcome::Compacted {
        before,
        after: ctx.execution_log.len(),
    })
}

fn compact_memory(
    ctx: &mut CompactionContext,
    settings: &CompactionSettings,
) -> Result<KeyOutcome, CompactionError> {
    let before = ctx.memory.len();
    if before <= settings.max_memory_items {
        return Ok(KeyOutcome::Unchanged);
    }
    ctx.memory = select_memory(&ctx.memory, settings.max_memory_items);
    if ctx.memory.len() == before {
        return Ok(KeyOutcome::Unchanged);
    }
    Ok(KeyOutcome::Compacted {
        before,
        after: ctx.memory.len(),
    })
}

fn annotate_vault(
    ctx: &mut CompactionContext,
    settings: &CompactionSettings,
) -> Result<KeyOutcome, CompactionError> {
    let chars = ctx.vault_summary.chars().count();
    if chars <= settings.max_vault_summary_chars || ctx.vault_summary.starts_with(VAULT_NOTE_PREFIX)
    {
        return Ok(KeyOutcome::Unchanged);
    }
    ctx.vault_summary = format!(
        "{VAULT_NOTE_PREFIX} {chars} characters; every entry remains addressable by reference.]\n{}",
        ctx.vault_summary
    );
    // Annotation only: the entry count is unchanged.
    Ok(KeyOutcome::Compacted {
        before: chars,
        after: ctx.vault_summary.chars().count(),
    })
}

/// Every important item, then the most recent regular items up to
/// `budget`, in their original relative order.
pub fn select_memory(items: &[MemoryItem], budget: usize) -> Vec<MemoryItem> {
    let important = items.iter().filter(|m| m.important).count();
    let regular_budget = budget.saturating_sub(important);
    let regular_total = items.len() - important;
    let mut skip_regular = regular_total.saturating_sub(regular_budget);

    items
        .iter()
        .filter(|m| {
            if m.important {
                return true;
            }
            if skip_regular > 0 {
                skip_regular -= 1;
                return false;
            }
            true
        })
        .cloned()
        .collect()
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Splits off one leading summary record, if present.
fn split_leading<T>(items: &[T], is_summary: impl Fn(&T) -> bool) -> (Option<&T>, &[T]) {
    match items.first() {
        Some(first) if is_summary(first) => (Some(first), &items[1..]),
        _ => (None, items),
    }
}

fn timestamp_label(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Operation names are free-form; the summary list uses `, ` and `×` as
/// delimiters, so those characters are replaced before folding.
fn operation_label(operation: &str) -> String {
    operation.replace(',', ";").replace('×', "x")
}

fn parse_reasoning_summary(content: &str) -> Option<(usize, Vec<(String, usize)>)> {
    let caps = REASONING_SUMMARY_RE.captures(content)?;
    let count = caps.get(1)?.as_str().parse().ok()?;
    let ops = caps
        .get(2)?
        .as_str()
        .split(", ")
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (op, n) = part.rsplit_once('×')?;
            Some((op.to_string(), n.parse().ok()?))
        })
        .collect::<Option<Vec<_>>>()?;
    Some((count, ops))
}

fn parse_execution_summary(text: &str) -> Option<(usize, usize, usize)> {
    let caps = EXECUTION_SUMMARY_RE.captures(text)?;
    Some((
        caps.get(1)?.as_str().parse().ok()?,
        caps.get(2)?.as_str().parse().ok()?,
        caps.get(3)?.as_str().parse().ok()?,
    ))
}
