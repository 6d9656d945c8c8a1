// Stage sequencer: Scout -> Editor -> Specialist -> Reviewer -> Fixer.
//
// Owns the run id, the run-scoped cancellation token, the top-level timeout
// and per-stage usage accounting. Every stage runs inside the run's span so
// each log line carries `run_id`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use gamescribe_archive::SourceCache;
use gamescribe_common::config::validate;
use gamescribe_common::{GenerationError, GenerationSettings, ResearchCategory};

use crate::agents::{Editor, Fixer, Reviewer, Scout};
use crate::article::{ArticleDraft, ArticlePlan, ReviewResult};
use crate::context::GenerationContext;
use crate::infra::RetryPolicy;
use crate::research::{FailedQuery, ResearchQuery, ResearchScheduler};
use crate::traits::{Clock, LanguageModel, NoopProgress, ProgressReporter, SystemClock, WebSearcher};
use crate::usage::{CleaningMetrics, MeterTotals, RunMetrics, Stage, StageMetrics, UsageMeter};
use crate::writing::{SectionWriter, WriteMode};

/// Everything the pipeline talks to. Optional capabilities default to off
/// and the reporter and clock default to no-op and wall-clock.
#[derive(TypedBuilder)]
pub struct PipelineDeps {
    pub model: Arc<dyn LanguageModel>,
    pub keyword_search: Arc<dyn WebSearcher>,
    #[builder(default)]
    pub semantic_search: Option<Arc<dyn WebSearcher>>,
    #[builder(default)]
    pub source_cache: Option<Arc<SourceCache>>,
    /// Meter shared with the source cleaner, so cleaning spend shows up in run metrics.
    #[builder(default)]
    pub cleaning_meter: Option<Arc<UsageMeter>>,
    #[builder(default = Arc::new(NoopProgress))]
    pub progress: Arc<dyn ProgressReporter>,
    #[builder(default = Arc::new(SystemClock))]
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResearchSummary {
    pub queries: usize,
    pub urls: usize,
    pub failed_queries: Vec<String>,
    pub cost_by_provider: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct GeneratedArticle {
    pub run_id: Uuid,
    pub plan: ArticlePlan,
    pub draft: ArticleDraft,
    pub markdown: String,
    pub review: ReviewResult,
    pub fixer_iterations: u32,
    pub metrics: RunMetrics,
    pub research: ResearchSummary,
}

pub struct Pipeline {
    deps: PipelineDeps,
    settings: GenerationSettings,
    retry: RetryPolicy,
}

impl Pipeline {
    /// Fails with `CONFIG_ERROR` when the settings are inconsistent.
    pub fn new(deps: PipelineDeps, settings: GenerationSettings) -> Result<Self, GenerationError> {
        validate(&settings)?;
        let retry = RetryPolicy::from_settings(&settings.retry);
        Ok(Self {
            deps,
            settings,
            retry,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Generate one article.
    ///
    /// `token` cancels the run (`CANCELLED`); the configured or per-context
    /// timeout cancels it too but reports `TIMEOUT`.
    pub async fn generate(
        &self,
        ctx: GenerationContext,
        token: &CancellationToken,
    ) -> Result<GeneratedArticle, GenerationError> {
        ctx.validate()?;

        let run_id = Uuid::new_v4();
        let timeout = ctx.timeout.unwrap_or_else(|| self.settings.timeout());
        let span = info_span!(
            "generation",
            run_id = %run_id,
            game = %ctx.game_name,
            category = %ctx.category,
        );
        let run_token = token.child_token();

        let run = self
            .run_stages(&ctx, run_id, &run_token)
            .instrument(span.clone());

        tokio::select! {
            biased;
            result = run => result,
            _ = tokio::time::sleep(timeout) => {
                run_token.cancel();
                warn!(parent: &span, timeout_secs = timeout.as_secs(), "Generation timed out");
                Err(GenerationError::Timeout { after: timeout })
            }
        }
    }

    fn scheduler(&self) -> ResearchScheduler {
        ResearchScheduler::new(self.deps.keyword_search.clone(), self.settings.research.clone())
            .with_semantic(self.deps.semantic_search.clone())
            .with_cache(self.deps.source_cache.clone())
            .with_progress(self.deps.progress.clone())
            .with_clock(self.deps.clock.clone())
            .with_retry(self.retry.clone())
    }

    fn start_stage(&self, stage: Stage, token: &CancellationToken) -> Result<DateTime<Utc>, GenerationError> {
        if token.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        self.deps.progress.on_progress(stage, 0, None);
        Ok(self.deps.clock.now())
    }

    fn finish_stage(
        &self,
        metrics: &mut RunMetrics,
        stage: Stage,
        started: DateTime<Utc>,
        meter: &UsageMeter,
        search_cost_usd: f64,
    ) {
        let totals = meter.totals();
        metrics.push(StageMetrics {
            stage,
            duration_ms: self.deps.clock.elapsed_ms(started),
            usage: totals.usage,
            cost_usd: totals.cost_usd,
            llm_calls: totals.llm_calls,
            search_cost_usd,
        });
        self.deps.progress.on_progress(stage, 100, None);
    }

    async fn run_stages(
        &self,
        ctx: &GenerationContext,
        run_id: Uuid,
        token: &CancellationToken,
    ) -> Result<GeneratedArticle, GenerationError> {
        let stage_error = |stage: Stage, err: anyhow::Error| {
            if token.is_cancelled() {
                GenerationError::Cancelled
            } else {
                GenerationError::from_stage(stage.as_str(), err)
            }
        };

        let models = &self.settings.models;
        let model = self.deps.model.clone();
        let scheduler = self.scheduler();
        let cleaning_before = self.deps.cleaning_meter.as_ref().map(|m| m.totals());
        let mut metrics = RunMetrics::default();
        info!(
            target_words = ctx.target_word_count,
            parallel = ctx.writes_in_parallel(),
            "Generation started"
        );

        // --- Scout ---
        let started = self.start_stage(Stage::Scout, token)?;
        let meter = Arc::new(UsageMeter::new());
        let report = Scout::new(
            model.clone(),
            &models.scout,
            self.retry.clone(),
            self.settings.writing.max_research_chars,
            meter.clone(),
        )
        .run(ctx, &scheduler, token)
        .instrument(info_span!("stage", stage = "scout"))
        .await
        .map_err(|e| stage_error(Stage::Scout, e))?;
        self.finish_stage(&mut metrics, Stage::Scout, started, &meter, report.research.total_cost_usd());

        // --- Editor ---
        let started = self.start_stage(Stage::Editor, token)?;
        let meter = Arc::new(UsageMeter::new());
        let plan = Editor::new(
            model.clone(),
            &models.editor,
            self.settings.editor.clone(),
            self.retry.clone(),
            meter.clone(),
        )
        .plan(ctx, &report.briefing, token)
        .instrument(info_span!("stage", stage = "editor"))
        .await
        .map_err(|e| stage_error(Stage::Editor, e))?;
        self.finish_stage(&mut metrics, Stage::Editor, started, &meter, 0.0);

        // --- Specialist ---
        let started = self.start_stage(Stage::Specialist, token)?;
        let meter = Arc::new(UsageMeter::new());
        let section_queries: Vec<ResearchQuery> = plan
            .sections
            .iter()
            .flat_map(|s| s.research_queries.iter())
            .map(|q| ResearchQuery::new(q.clone(), ResearchCategory::SectionSpecific))
            .collect();
        let research = scheduler
            .run(report.pool(), section_queries, ctx.category, &ctx.game_name, token)
            .instrument(info_span!("stage", stage = "specialist"))
            .await
            .map_err(|e| stage_error(Stage::Specialist, e))?;

        let writer = SectionWriter::new(model.clone(), &models.specialist, self.settings.writing.clone())
            .with_retry(self.retry.clone())
            .with_progress(self.deps.progress.clone())
            .with_meter(meter.clone());
        let mode = if ctx.writes_in_parallel() {
            WriteMode::Parallel
        } else {
            WriteMode::Sequential
        };
        let sections = writer
            .write_all(ctx, &plan, &research.pool, mode, token)
            .instrument(info_span!("stage", stage = "specialist"))
            .await
            .map_err(|e| stage_error(Stage::Specialist, e))?;
        let draft = ArticleDraft {
            title: plan.title.clone(),
            excerpt: plan.excerpt.clone(),
            tags: plan.tags.clone(),
            sections,
        };
        self.finish_stage(&mut metrics, Stage::Specialist, started, &meter, research.total_cost_usd());

        // --- Reviewer ---
        let started = self.start_stage(Stage::Reviewer, token)?;
        let meter = Arc::new(UsageMeter::new());
        let reviewer = Reviewer::new(
            model.clone(),
            &models.reviewer,
            self.retry.clone(),
            self.settings.max_sources,
            meter.clone(),
        );
        let review = reviewer
            .review(ctx, &plan, &draft, token)
            .instrument(info_span!("stage", stage = "reviewer"))
            .await
            .map_err(|e| stage_error(Stage::Reviewer, e))?;
        self.finish_stage(&mut metrics, Stage::Reviewer, started, &meter, 0.0);

        // --- Fixer ---
        let started = self.start_stage(Stage::Fixer, token)?;
        let meter = Arc::new(UsageMeter::new());
        let fix_writer = SectionWriter::new(model.clone(), &models.specialist, self.settings.writing.clone())
            .with_retry(self.retry.clone())
            .with_meter(meter.clone());
        let fixed = Fixer::new(
            model,
            &models.fixer,
            self.settings.fixer.clone(),
            self.retry.clone(),
            fix_writer,
            meter.clone(),
        )
        .run(ctx, plan, draft, review, &research.pool, &reviewer, token)
        .instrument(info_span!("stage", stage = "fixer"))
        .await
        .map_err(|e| stage_error(Stage::Fixer, e))?;
        self.finish_stage(&mut metrics, Stage::Fixer, started, &meter, 0.0);

        metrics.cleaning = self
            .deps
            .cleaning_meter
            .as_ref()
            .zip(cleaning_before)
            .map(|(m, before)| cleaning_delta(before, m.totals()));

        let markdown = fixed.draft.to_markdown(self.settings.max_sources);
        let failed_queries = report
            .research
            .failed_queries
            .iter()
            .chain(research.failed_queries.iter())
            .map(|f: &FailedQuery| f.query.clone())
            .collect();
        let mut cost_by_provider = report.research.cost_by_provider.clone();
        for (provider, cost) in &research.cost_by_provider {
            *cost_by_provider.entry(provider.clone()).or_insert(0.0) += cost;
        }

        info!(
            sections = fixed.draft.sections.len(),
            words = fixed.draft.word_count(),
            approved = fixed.review.approved,
            fixer_iterations = fixed.iterations,
            input_tokens = metrics.total_usage().input_tokens,
            output_tokens = metrics.total_usage().output_tokens,
            cost_usd = metrics.total_cost_usd(),
            "Generation complete"
        );

        Ok(GeneratedArticle {
            run_id,
            research: ResearchSummary {
                queries: research.pool.query_count(),
                urls: research.pool.url_count(),
                failed_queries,
                cost_by_provider,
            },
            plan: fixed.plan,
            markdown,
            draft: fixed.draft,
            review: fixed.review,
            fixer_iterations: fixed.iterations,
            metrics,
        })
    }
}

fn cleaning_delta(before: MeterTotals, after: MeterTotals) -> CleaningMetrics {
    CleaningMetrics {
        usage: gamescribe_common::TokenUsage::new(
            after.usage.input_tokens.saturating_sub(before.usage.input_tokens),
            after.usage.output_tokens.saturating_sub(before.usage.output_tokens),
        ),
        cost_usd: (after.cost_usd - before.cost_usd).max(0.0),
        llm_calls: after.llm_calls.saturating_sub(before.llm_calls),
    }
}
