//! Prompt assembly.
//!
//! [`ContextBuilder::build_prompt`] takes one snapshot, runs every
//! configured section's provider concurrently, and composes the results in
//! declaration order. A failing or panicking provider only affects its own
//! section, which falls back to its configured placeholder.

pub mod compactor;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod snapshot;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tracing::{debug, instrument, trace, warn};

use loom_core::{ContextSection, ProviderError};
use loom_settings::ContextSettings;
use loom_store::StateStore;

use crate::error::panic_message;

use self::compactor::Compactor;
use self::provider::ProviderContext;
use self::registry::ProviderRegistry;
use self::snapshot::StateSnapshot;

const PENDING_ERROR_PROVIDER: &str = "pendingError";

/// Input to one prompt build.
#[derive(Clone, Debug, Default)]
pub struct BuildRequest {
    pub query: String,
    pub iteration: u32,
    pub max_iterations: u32,
    /// Overrides the configured system prompt when set.
    pub system_prompt: Option<String>,
    /// Overrides the configured trailing instructions when set.
    pub instructions: Option<String>,
}

impl BuildRequest {
    pub fn new(query: impl Into<String>, iteration: u32, max_iterations: u32) -> Self {
        Self {
            query: query.into(),
            iteration,
            max_iterations,
            ..Default::default()
        }
    }
}

/// How one section ended up in (or out of) the prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SectionOutcome {
    Rendered,
    Fallback,
    Omitted,
    /// The provider failed; `used_fallback` says whether placeholder text
    /// took its place.
    Failed { error: String, used_fallback: bool },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionReport {
    pub id: String,
    pub provider_id: String,
    pub outcome: SectionOutcome,
}

#[derive(Clone, Debug)]
pub struct BuiltPrompt {
    pub prompt: String,
    /// One entry per configured section, in declaration order.
    pub sections: Vec<SectionReport>,
    /// A pending error was shown and then cleared from the store.
    pub pending_error_consumed: bool,
}

pub struct ContextBuilder {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn StateStore>,
    settings: ContextSettings,
    compactor: Option<Arc<Compactor>>,
}

impl ContextBuilder {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn StateStore>,
        settings: ContextSettings,
    ) -> Self {
        Self {
            registry,
            store,
            settings,
            compactor: None,
        }
    }

    /// Providers see the compacted view of the snapshot.
    pub fn with_compactor(mut self, compactor: Arc<Compactor>) -> Self {
        self.compactor = Some(compactor);
        self
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    #[instrument(skip_all, fields(iteration = request.iteration))]
    pub async fn build_prompt(&self, request: &BuildRequest) -> BuiltPrompt {
        let captured = StateSnapshot::new(self.store.clone());
        captured.capture().await;
        let snapshot = match &self.compactor {
            Some(compactor) => {
                let (compacted, report) = captured.compacted(compactor).await;
                trace!(?report, "snapshot compacted for build");
                compacted
            }
            None => captured,
        };
        let snapshot = Arc::new(snapshot);
        let had_pending = snapshot.pending_error().await.is_some();

        let base = ProviderContext {
            query: request.query.clone(),
            iteration: request.iteration,
            max_iterations: request.max_iterations,
            limits: self.settings.limits.clone(),
            snapshot: snapshot.clone(),
            section: ContextSection::new("", ""),
        };

        // All sections start before any is awaited; join_all yields results
        // in input order regardless of completion order.
        let jobs = self.settings.sections.iter().map(|section| {
            let mut ctx = base.clone();
            ctx.section = section.clone();
            async move {
                let result = self.run_section(&ctx).await;
                (ctx.section, result)
            }
        });
        let results = join_all(jobs).await;

        let mut blocks = Vec::new();
        let mut reports = Vec::with_capacity(results.len());
        for (section, result) in results {
            let (block, outcome) = compose_section(&section, result);
            if let Some(block) = block {
                blocks.push(block);
            }
            reports.push(SectionReport {
                id: section.id,
                provider_id: section.provider_id,
                outcome,
            });
        }

        let prompt = self.assemble(request, &blocks);

        let pending_shown = reports.iter().any(|r| {
            r.provider_id == PENDING_ERROR_PROVIDER && r.outcome == SectionOutcome::Rendered
        });
        let pending_error_consumed =
            had_pending && pending_shown && self.settings.clear_pending_after_build && self.clear_pending().await;

        debug!(
            sections = reports.len(),
            rendered = blocks.len(),
            chars = prompt.len(),
            pending_error_consumed,
            "prompt built"
        );

        BuiltPrompt {
            prompt,
            sections: reports,
            pending_error_consumed,
        }
    }

    async fn run_section(&self, ctx: &ProviderContext) -> Result<String, ProviderError> {
        let provider_id = ctx.section.provider_id.as_str();
        let Some(provider) = self.registry.get(provider_id) else {
            return Err(ProviderError::NotFound(provider_id.to_string()));
        };

        let work = async {
            let value = provider.collect(ctx).await?;
            let rendered = provider.format(value, ctx).await?;
            Ok::<_, ProviderError>(rendered.into_content())
        };
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(ProviderError::Panicked(panic_message(&panic))),
        }
    }

    fn assemble(&self, request: &BuildRequest, blocks: &[String]) -> String {
        let system_prompt = request
            .system_prompt
            .as_deref()
            .or(self.settings.system_prompt.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let heading = self
            .settings
            .heading
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let body = blocks.join(&self.settings.joiner);
        let marker = self
            .settings
            .iteration_template
            .replace("{iteration}", &request.iteration.to_string())
            .replace("{maxIterations}", &request.max_iterations.to_string());

        let mut parts: Vec<&str> = Vec::with_capacity(4);
        parts.extend(system_prompt);
        parts.extend(heading);
        if !body.is_empty() {
            parts.push(&body);
        }
        parts.push(&marker);
        let mut prompt = parts.join("\n\n");

        let instructions = request
            .instructions
            .as_deref()
            .or(self.settings.instructions.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(instructions) = instructions {
            prompt.push_str(&self.settings.instructions_separator);
            prompt.push_str(instructions);
        }
        prompt
    }

    /// Clear the pending-error slot. A failed write keeps the record for the
    /// next build rather than aborting this one.
    async fn clear_pending(&self) -> bool {
        match self.store.save_pending_error(None).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to clear pending execution error");
                false
            }
        }
    }
}

/// Apply the empty/fallback rules to one section result.
fn compose_section(
    section: &ContextSection,
    result: Result<String, ProviderError>,
) -> (Option<String>, SectionOutcome) {
    let (content, error) = match result {
        Ok(content) => (content, None),
        Err(e) => {
            warn!(
                section_id = %section.id,
                provider_id = %section.provider_id,
                error = %e,
                "context provider failed, using fallback"
            );
            (String::new(), Some(e.to_string()))
        }
    };

    let with_heading = |text: &str| match section.heading.as_deref() {
        Some(h) if !h.trim().is_empty() => format!("{}\n{text}", h.trim()),
        _ => text.to_string(),
    };

    if !content.is_empty() {
        return (Some(with_heading(&content)), SectionOutcome::Rendered);
    }

    let fallback = section
        .fallback
        .as_deref()
        .map(str::trim)
        .filter(|f| section.include_when_empty && !f.is_empty());
    let block = fallback.map(with_heading);
    let outcome = match error {
        Some(error) => SectionOutcome::Failed {
            error,
            used_fallback: block.is_some(),
        },
        None if block.is_some() => SectionOutcome::Fallback,
        None => SectionOutcome::Omitted,
    };
    (block, outcome)
}
