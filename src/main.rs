//! `loom`: assemble prompts from stored agent state, run model-issued code
//! under an execution policy, and replay scripted model sessions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use loom_core::{ExecutionRequest, ModelReply};
use loom_engine::{
    default_registry, record_execution, BuildRequest, Compactor, ContextBuilder, ExecutionPolicy,
    Executor, IterationLoop, ProcessRunner, ReferenceInliner, ScriptedModel,
};
use loom_settings::{load_settings, load_settings_from_path, LoomSettings, StrategyKind};
use loom_store::{Database, InMemoryStore, SqliteStore, StateStore};
use loom_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "loom", version, about = "Context assembly and execution feedback for agent loops")]
struct Cli {
    /// Settings file (defaults to ~/.loom/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// State database, overriding `storage.databasePath`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Keep all state in memory for this run.
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the prompt that would be sent for the given query.
    Prompt {
        query: String,
        #[arg(long, default_value_t = 1)]
        iteration: u32,
        /// Consume the pending execution error like a real build would.
        #[arg(long)]
        consume: bool,
    },
    /// Run one piece of code under the configured execution policy.
    Exec {
        code: String,
        /// Vault value for `{{vault:NAME}}` tokens, as NAME=VALUE.
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,
        /// Override the configured strategy (direct, retry, referenceAware).
        #[arg(long)]
        strategy: Option<StrategyKind>,
    },
    /// Run the iteration loop against replies read from a JSON file.
    Replay {
        /// JSON array of `{ "reasoning": .., "code": .., "references": [..] }`.
        replies: PathBuf,
        #[arg(long)]
        query: String,
        #[arg(long)]
        max_iterations: Option<u32>,
    },
}

/// How a command finished. Mapped to an exit status in `main`, after the
/// store and the telemetry guard have been dropped.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Done,
    ExecutionFailed,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Done => ExitCode::SUCCESS,
            Outcome::ExecutionFailed => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(outcome) => outcome.into(),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<Outcome> {
    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("load settings from {}", path.display()))?,
        None => load_settings().context("load settings")?,
    };

    let _telemetry = init_telemetry(TelemetryConfig::from_levels(
        &settings.logging.level,
        &settings.logging.module_levels,
        settings.logging.json,
    ));

    let store = open_store(&cli, &settings)?;
    match cli.command {
        Command::Prompt {
            query,
            iteration,
            consume,
        } => cmd_prompt(&settings, store, &query, iteration, consume).await,
        Command::Exec {
            code,
            vars,
            strategy,
        } => cmd_exec(&settings, store, &code, &vars, strategy).await,
        Command::Replay {
            replies,
            query,
            max_iterations,
        } => cmd_replay(&settings, store, &replies, &query, max_iterations).await,
    }
}

fn open_store(cli: &Cli, settings: &LoomSettings) -> Result<Arc<dyn StateStore>> {
    if cli.ephemeral {
        tracing::info!("using in-memory state, nothing will be persisted");
        return Ok(Arc::new(InMemoryStore::new()));
    }
    let path = cli
        .db
        .clone()
        .unwrap_or_else(|| settings.storage.resolved_database_path());
    let db = Database::open(&path).with_context(|| format!("open database {}", path.display()))?;
    Ok(Arc::new(SqliteStore::new(db)))
}

fn context_builder(settings: &LoomSettings, store: Arc<dyn StateStore>) -> ContextBuilder {
    let builder = ContextBuilder::new(
        Arc::new(default_registry()),
        store,
        settings.context.clone(),
    );
    if settings.compaction.enabled {
        builder.with_compactor(Arc::new(Compactor::new(settings.compaction.clone())))
    } else {
        builder
    }
}

async fn cmd_prompt(
    settings: &LoomSettings,
    store: Arc<dyn StateStore>,
    query: &str,
    iteration: u32,
    consume: bool,
) -> Result<Outcome> {
    let mut settings = settings.clone();
    settings.context.clear_pending_after_build = consume;
    let builder = context_builder(&settings, store);
    let built = builder
        .build_prompt(&BuildRequest::new(
            query,
            iteration,
            settings.loop_.max_iterations,
        ))
        .await;
    println!("{}", built.prompt);
    Ok(Outcome::Done)
}

async fn cmd_exec(
    settings: &LoomSettings,
    store: Arc<dyn StateStore>,
    code: &str,
    vars: &[String],
    strategy: Option<StrategyKind>,
) -> Result<Outcome> {
    let mut execution = settings.execution.clone();
    if let Some(strategy) = strategy {
        execution.strategy = strategy;
    }
    let values = parse_vars(vars)?;

    let executor = Executor::new(
        ExecutionPolicy::from_settings(&execution),
        Arc::new(ProcessRunner::new(execution.interpreter.clone())),
    )
    .with_hook(Arc::new(ReferenceInliner::from_map(values)));

    let result = executor.execute(ExecutionRequest::new(code)).await?;
    let report = json!({
        "success": result.success,
        "value": &result.value,
        "error": result.error.as_ref().map(ToString::to_string),
        "references": &result.request.references,
        "metadata": &result.metadata,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    // Outside the loop there is no iteration; failures are filed under 0.
    let success = result.success;
    record_execution(store.as_ref(), result, 0)
        .await
        .context("record execution")?;
    Ok(if success {
        Outcome::Done
    } else {
        Outcome::ExecutionFailed
    })
}

async fn cmd_replay(
    settings: &LoomSettings,
    store: Arc<dyn StateStore>,
    replies_path: &Path,
    query: &str,
    max_iterations: Option<u32>,
) -> Result<Outcome> {
    let raw = std::fs::read_to_string(replies_path)
        .with_context(|| format!("read {}", replies_path.display()))?;
    let replies: Vec<ModelReply> =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", replies_path.display()))?;

    let executor = Executor::new(
        ExecutionPolicy::from_settings(&settings.execution),
        Arc::new(ProcessRunner::new(settings.execution.interpreter.clone())),
    );
    let model = Arc::new(ScriptedModel::new(replies));
    let mut iteration_loop = IterationLoop::new(
        context_builder(settings, store.clone()),
        model,
        executor,
        store,
    )
    .with_max_iterations(max_iterations.unwrap_or(settings.loop_.max_iterations));
    if settings.compaction.enabled {
        iteration_loop =
            iteration_loop.with_compactor(Arc::new(Compactor::new(settings.compaction.clone())));
    }

    let outcome = iteration_loop.run(query).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(Outcome::Done)
}

fn parse_vars(vars: &[String]) -> Result<HashMap<String, String>> {
    let mut values = HashMap::new();
    for var in vars {
        let Some((name, value)) = var.split_once('=') else {
            bail!("--var expects NAME=VALUE, got '{var}'");
        };
        values.insert(name.trim().to_string(), value.to_string());
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vars_split_on_first_equals() {
        let values = parse_vars(&["token=a=b".into(), " host =example".into()]).unwrap();
        assert_eq!(values["token"], "a=b");
        assert_eq!(values["host"], "example");
        assert!(parse_vars(&["broken".into()]).is_err());
    }

    #[tokio::test]
    async fn failed_exec_is_recorded_and_reported_as_status_2() {
        let settings = LoomSettings::default();
        let store = Arc::new(InMemoryStore::new());

        let outcome = cmd_exec(&settings, store.clone(), "echo nope >&2; exit 3", &[], None)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::ExecutionFailed);
        let pending = store.pending_error().unwrap();
        assert_eq!(pending.error_message, "nope");
        assert_eq!(pending.iteration, 0);

        let outcome = cmd_exec(&settings, store.clone(), "echo ok", &[], None)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(store.execution_len(), 2);
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "loom",
            "--ephemeral",
            "exec",
            "echo hi",
            "--var",
            "k=v",
            "--strategy",
            "referenceAware",
        ])
        .unwrap();
        assert!(cli.ephemeral);
        match cli.command {
            Command::Exec { code, vars, strategy } => {
                assert_eq!(code, "echo hi");
                assert_eq!(vars, vec!["k=v"]);
                assert_eq!(strategy, Some(StrategyKind::ReferenceAware));
            }
            _ => panic!("expected exec"),
        }
    }
}
