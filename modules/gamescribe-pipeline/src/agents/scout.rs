use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use gamescribe_common::{ArticleCategory, ResearchCategory};

use crate::context::GenerationContext;
use crate::infra::RetryPolicy;
use crate::research::{ResearchOutcome, ResearchPool, ResearchQuery, ResearchScheduler};
use crate::traits::{GenerateRequest, LanguageModel};
use crate::usage::UsageMeter;
use crate::writing::section_writer::format_research;

use super::generate_text;
use super::prompts::{scout_briefing_prompt, SCOUT_SYSTEM};

/// Broad research queries for a game: background, category angle, recent news.
pub fn scout_queries(ctx: &GenerationContext) -> Vec<ResearchQuery> {
    let game = ctx.game_name.trim();
    let mut queries = vec![
        ResearchQuery::new(format!("{game} game overview"), ResearchCategory::Overview),
        ResearchQuery::new(format!("{game} gameplay mechanics"), ResearchCategory::Overview),
    ];

    let angle: &[&str] = match ctx.category {
        ArticleCategory::Guide => &["beginner guide tips", "walkthrough"],
        ArticleCategory::Review => &["review", "critic and player reception"],
        ArticleCategory::News => &["latest news", "announcement"],
        ArticleCategory::List => &["best builds and items ranked", "tier list"],
    };
    queries.extend(
        angle
            .iter()
            .map(|a| ResearchQuery::new(format!("{game} {a}"), ResearchCategory::CategorySpecific)),
    );

    queries.push(ResearchQuery::new(
        format!("{game} latest update patch notes"),
        ResearchCategory::Recent,
    ));
    queries
}

#[derive(Debug, Clone)]
pub struct ScoutReport {
    pub briefing: String,
    pub research: ResearchOutcome,
}

impl ScoutReport {
    pub fn pool(&self) -> &ResearchPool {
        &self.research.pool
    }
}

pub struct Scout {
    model: Arc<dyn LanguageModel>,
    model_name: String,
    retry: RetryPolicy,
    max_research_chars: usize,
    meter: Arc<UsageMeter>,
}

impl Scout {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        model_name: impl Into<String>,
        retry: RetryPolicy,
        max_research_chars: usize,
        meter: Arc<UsageMeter>,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            retry,
            max_research_chars,
            meter,
        }
    }

    pub async fn run(
        &self,
        ctx: &GenerationContext,
        scheduler: &ResearchScheduler,
        token: &CancellationToken,
    ) -> Result<ScoutReport> {
        let research = scheduler
            .run(
                &ResearchPool::default(),
                scout_queries(ctx),
                ctx.category,
                &ctx.game_name,
                token,
            )
            .await
            .context("scout research")?;

        let results: Vec<_> = research.pool.all_results().cloned().collect();
        let research_text = format_research(&results, self.max_research_chars);
        let request = GenerateRequest::new("scout", &self.model_name)
            .system(SCOUT_SYSTEM)
            .prompt(scout_briefing_prompt(ctx, &research_text))
            .temperature(0.3)
            .max_output_tokens(1_500);

        let briefing = generate_text(
            self.model.as_ref(),
            &request,
            &self.retry,
            Some(token),
            &self.meter,
        )
        .await
        .context("scout briefing")?;

        info!(
            queries = research.pool.query_count(),
            urls = research.pool.url_count(),
            failed = research.failed,
            briefing_chars = briefing.len(),
            "Scout complete"
        );

        Ok(ScoutReport {
            briefing: briefing.trim().to_string(),
            research,
        })
    }
}
