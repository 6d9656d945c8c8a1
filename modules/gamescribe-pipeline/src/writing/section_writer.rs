// Section writing. Sequential mode threads the previous section's tail and
// the cross-reference state forward; parallel mode writes every section
// independently and restores plan order on assembly.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ai_client::{strip_code_blocks, tail_chars, truncate_chars};
use gamescribe_common::config::WritingSettings;
use gamescribe_common::CategorizedSearchResult;

use crate::agents::prompts::{section_prompt, SectionPromptParts, SPECIALIST_SYSTEM};
use crate::article::{ArticlePlan, DraftSection, SourceRef};
use crate::context::GenerationContext;
use crate::infra::{cancellable, ensure_not_cancelled, retry_with_backoff, RetryPolicy};
use crate::research::{extract_research_for_queries, ResearchPool};
use crate::traits::{GenerateRequest, LanguageModel, NoopProgress, ProgressReporter};
use crate::usage::UsageMeter;

use super::cross_refs::SectionWriteState;
use super::pacing::ParagraphRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Sequential,
    Parallel,
}

/// Research attached to one section, already rendered for the prompt.
#[derive(Debug, Clone)]
pub struct SectionResearch {
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub thin: bool,
}

impl SectionResearch {
    pub fn gather(queries: &[String], pool: &ResearchPool, settings: &WritingSettings) -> Self {
        let results = extract_research_for_queries(queries, pool, true);
        let text = format_research(&results, settings.max_research_chars);
        let thin = text.trim().chars().count() < settings.thin_research_chars;
        Self {
            sources: sources_of(&results),
            text,
            thin,
        }
    }
}

pub(crate) fn format_research(results: &[Arc<CategorizedSearchResult>], max_chars: usize) -> String {
    let mut out = String::new();
    for result in results {
        if let Some(answer) = result.answer.as_deref() {
            out.push_str(&format!("Summary for \"{}\": {}\n\n", result.query, answer.trim()));
        }
        for item in &result.results {
            let body = item.research_text();
            if body.trim().is_empty() {
                continue;
            }
            out.push_str(&format!("### {} ({})\n{}\n\n", item.title.trim(), item.url, body.trim()));
        }
    }
    truncate_chars(&out, max_chars).to_string()
}

fn sources_of(results: &[Arc<CategorizedSearchResult>]) -> Vec<SourceRef> {
    let mut seen = HashSet::new();
    results
        .iter()
        .flat_map(|r| r.results.iter())
        .filter(|item| seen.insert(item.url.clone()))
        .map(|item| SourceRef {
            title: item.title.clone(),
            url: item.url.clone(),
        })
        .collect()
}

/// Clean up model output: drop code fences and a repeated headline line.
pub(crate) fn tidy_section_body(raw: &str, headline: &str) -> String {
    let body = strip_code_blocks(raw);
    let mut lines = body.lines();
    let first = lines.clone().next().unwrap_or_default();
    let repeats_headline = first.trim_start().starts_with('#')
        && first.trim_start_matches('#').trim().eq_ignore_ascii_case(headline.trim());
    if repeats_headline {
        lines.next();
        lines.collect::<Vec<_>>().join("\n").trim().to_string()
    } else {
        body.to_string()
    }
}

/// Inputs for writing one section outside the normal pass (Fixer rewrites).
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionExtras<'a> {
    pub previous_tail: Option<&'a str>,
    pub cross_refs: Option<&'a SectionWriteState>,
    pub revision_note: Option<&'a str>,
}

pub struct SectionWriter {
    model: Arc<dyn LanguageModel>,
    model_name: String,
    settings: WritingSettings,
    retry: RetryPolicy,
    progress: Arc<dyn ProgressReporter>,
    meter: Arc<UsageMeter>,
}

impl SectionWriter {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        model_name: impl Into<String>,
        settings: WritingSettings,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            settings,
            retry: RetryPolicy::default(),
            progress: Arc::new(NoopProgress),
            meter: Arc::new(UsageMeter::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_meter(mut self, meter: Arc<UsageMeter>) -> Self {
        self.meter = meter;
        self
    }

    pub fn meter(&self) -> &Arc<UsageMeter> {
        &self.meter
    }

    pub fn settings(&self) -> &WritingSettings {
        &self.settings
    }

    /// Write every planned section. The result is always in plan order.
    pub async fn write_all(
        &self,
        ctx: &GenerationContext,
        plan: &ArticlePlan,
        pool: &ResearchPool,
        mode: WriteMode,
        token: &CancellationToken,
    ) -> Result<Vec<DraftSection>> {
        let total = plan.sections.len();
        let pacing = ParagraphRange::for_section(ctx.target_word_count, total, &self.settings);
        info!(
            sections = total,
            mode = ?mode,
            min_paragraphs = pacing.min,
            max_paragraphs = pacing.max,
            "Writing sections"
        );

        match mode {
            WriteMode::Sequential => self.write_sequential(ctx, plan, pool, pacing, token).await,
            WriteMode::Parallel => self.write_parallel(ctx, plan, pool, pacing, token).await,
        }
    }

    async fn write_sequential(
        &self,
        ctx: &GenerationContext,
        plan: &ArticlePlan,
        pool: &ResearchPool,
        pacing: ParagraphRange,
        token: &CancellationToken,
    ) -> Result<Vec<DraftSection>> {
        let total = plan.sections.len();
        let track_refs = ctx.category.tracks_cross_references();
        let mut state = SectionWriteState::new();
        let mut written: Vec<DraftSection> = Vec::with_capacity(total);

        for index in 0..total {
            ensure_not_cancelled(token)?;

            let previous_tail = written
                .last()
                .map(|s| tail_chars(&s.content, self.settings.previous_tail_chars));
            let extras = SectionExtras {
                previous_tail,
                cross_refs: track_refs.then_some(&state),
                revision_note: None,
            };
            let section = self
                .write_section(ctx, plan, index, pool, pacing, extras, token)
                .await?;

            if track_refs {
                state.record_section(&section.headline, &section.content);
            }
            self.progress
                .on_section_progress(index + 1, total, &section.headline);
            written.push(section);
        }

        Ok(written)
    }

    async fn write_parallel(
        &self,
        ctx: &GenerationContext,
        plan: &ArticlePlan,
        pool: &ResearchPool,
        pacing: ParagraphRange,
        token: &CancellationToken,
    ) -> Result<Vec<DraftSection>> {
        ensure_not_cancelled(token)?;
        let total = plan.sections.len();
        let done = AtomicUsize::new(0);
        let done = &done;

        let results = join_all((0..total).map(|index| async move {
            let section = self
                .write_section(ctx, plan, index, pool, pacing, SectionExtras::default(), token)
                .await?;
            let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
            self.progress
                .on_section_progress(finished, total, &section.headline);
            Ok::<_, anyhow::Error>(section)
        }))
        .await;

        results.into_iter().collect()
    }

    /// Write section `index` of `plan`.
    #[allow(clippy::too_many_arguments)]
    pub async fn write_section(
        &self,
        ctx: &GenerationContext,
        plan: &ArticlePlan,
        index: usize,
        pool: &ResearchPool,
        pacing: ParagraphRange,
        extras: SectionExtras<'_>,
        token: &CancellationToken,
    ) -> Result<DraftSection> {
        let section = plan
            .sections
            .get(index)
            .with_context(|| format!("plan has no section {index}"))?;
        let research = SectionResearch::gather(&section.research_queries, pool, &self.settings);

        let prompt = section_prompt(&SectionPromptParts {
            ctx,
            plan,
            index,
            section,
            research: &research.text,
            thin_research: research.thin,
            paragraphs: pacing,
            previous_tail: extras.previous_tail,
            cross_refs: extras.cross_refs,
            revision_note: extras.revision_note,
        });
        let request = GenerateRequest::new("specialist", &self.model_name)
            .system(SPECIALIST_SYSTEM)
            .prompt(prompt)
            .temperature(self.settings.temperature)
            .max_output_tokens(self.settings.max_output_tokens);

        let label = format!("section {:?}", section.headline);
        let generation = retry_with_backoff(&self.retry, Some(token), Some(&label), || {
            cancellable(token, self.model.generate_text(&request))
        })
        .await?;
        self.meter.record(generation.usage, generation.cost_usd);

        let content = tidy_section_body(&generation.text, &section.headline);
        debug!(
            section = %section.headline,
            words = content.split_whitespace().count(),
            thin_research = research.thin,
            "Section written"
        );

        Ok(DraftSection {
            headline: section.headline.clone(),
            content,
            thin_research: research.thin,
            sources: research.sources,
        })
    }
}
