use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "loom_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of compact human output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from textual levels as they appear in settings files.
    /// Unparseable levels are skipped with a note on stderr, since no
    /// subscriber exists yet to receive a warning.
    pub fn from_levels<'a, I>(level: &str, module_levels: I, json: bool) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let log_level = parse_level(level).unwrap_or_else(|| {
            eprintln!("loom-telemetry: unknown log level '{level}', using info");
            Level::INFO
        });
        let mut modules: Vec<(String, Level)> = module_levels
            .into_iter()
            .filter_map(|(module, lvl)| match parse_level(lvl) {
                Some(l) => Some((module.clone(), l)),
                None => {
                    eprintln!("loom-telemetry: unknown level '{lvl}' for {module}, skipping");
                    None
                }
            })
            .collect();
        modules.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            log_level,
            module_levels: modules,
            json,
        }
    }

    /// The `EnvFilter` directive string this config produces.
    pub fn filter_directives(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

fn parse_level(s: &str) -> Option<Level> {
    Level::from_str(s.trim()).ok()
}

/// Handle returned by [`init_telemetry`].
pub struct TelemetryGuard {
    filter: String,
    installed: bool,
}

impl TelemetryGuard {
    /// The filter actually in effect (`RUST_LOG` when set).
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// False when another global subscriber was already installed.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Initialize the tracing subscriber. Call once at startup; later calls
/// leave the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let directives = config.filter_directives();
    let (env_filter, filter) = match EnvFilter::try_from_default_env() {
        Ok(f) => {
            let s = f.to_string();
            (f, s)
        }
        Err(_) => (EnvFilter::new(&directives), directives),
    };

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .is_ok();

    TelemetryGuard { filter, installed }
}
