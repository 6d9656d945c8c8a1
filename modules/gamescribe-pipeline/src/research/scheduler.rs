// Batch research scheduler: dedup, route to a provider, search in bounded
// batches, degrade per query, feed results through the source cache.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gamescribe_archive::SourceCache;
use gamescribe_common::config::ResearchSettings;
use gamescribe_common::{
    normalize_query, ArticleCategory, Cancelled, CategorizedSearchResult, ResearchCategory,
    SearchResultItem,
};
use search_client::{ProviderKind, SearchDepth, SearchOptions, SearchResponse};

use crate::infra::{cancellable, ensure_not_cancelled, retry_with_backoff, sleep_or_cancel, RetryPolicy};
use crate::traits::{Clock, NoopProgress, ProgressReporter, SystemClock, WebSearcher};

use super::pool::ResearchPool;
use super::routing::{Lane, QueryRouter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchQuery {
    pub query: String,
    pub category: ResearchCategory,
}

impl ResearchQuery {
    pub fn new(query: impl Into<String>, category: ResearchCategory) -> Self {
        Self {
            query: query.into(),
            category,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedQuery {
    pub query: String,
    pub provider: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub pool: ResearchPool,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_queries: Vec<FailedQuery>,
    /// Spend per provider name, reported or estimated.
    pub cost_by_provider: BTreeMap<String, f64>,
}

impl ResearchOutcome {
    pub fn total_cost_usd(&self) -> f64 {
        self.cost_by_provider.values().sum()
    }
}

pub struct ResearchScheduler {
    keyword: Arc<dyn WebSearcher>,
    semantic: Option<Arc<dyn WebSearcher>>,
    cache: Option<Arc<SourceCache>>,
    progress: Arc<dyn ProgressReporter>,
    clock: Arc<dyn Clock>,
    settings: ResearchSettings,
    retry: RetryPolicy,
}

impl ResearchScheduler {
    pub fn new(keyword: Arc<dyn WebSearcher>, settings: ResearchSettings) -> Self {
        Self {
            keyword,
            semantic: None,
            cache: None,
            progress: Arc::new(NoopProgress),
            clock: Arc::new(SystemClock),
            settings,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_semantic(mut self, semantic: Option<Arc<dyn WebSearcher>>) -> Self {
        self.semantic = semantic;
        self
    }

    pub fn with_cache(mut self, cache: Option<Arc<SourceCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn search_options(&self) -> SearchOptions {
        SearchOptions {
            max_results: self.settings.max_results_per_query,
            depth: if self.settings.advanced_depth {
                SearchDepth::Advanced
            } else {
                SearchDepth::Basic
            },
            include_answer: self.settings.include_answer,
        }
    }

    fn estimated_cost(&self, searcher: &dyn WebSearcher) -> f64 {
        match searcher.kind() {
            ProviderKind::Semantic => self.settings.semantic_cost_usd,
            ProviderKind::Keyword if self.settings.advanced_depth => {
                self.settings.keyword_cost_advanced_usd
            }
            ProviderKind::Keyword => self.settings.keyword_cost_basic_usd,
        }
    }

    /// Research every query not already in `pool` and return the enriched pool.
    ///
    /// Per-query provider failures are recorded in the outcome; only
    /// cancellation aborts the whole run.
    pub async fn run(
        &self,
        pool: &ResearchPool,
        queries: Vec<ResearchQuery>,
        category: ArticleCategory,
        topic: &str,
        token: &CancellationToken,
    ) -> Result<ResearchOutcome> {
        let pending = dedup_against(pool, queries);
        let total = pending.len();
        self.progress.on_research_progress(0, total);

        let router = QueryRouter::new(
            category,
            &self.settings.semantic_routing_categories,
            self.semantic.is_some(),
        );
        let mut keyword_lane = Vec::new();
        let mut semantic_lane = Vec::new();
        for query in pending {
            match (router.route(&query.query), &self.semantic) {
                (Lane::Semantic, Some(_)) => semantic_lane.push(query),
                _ => keyword_lane.push(query),
            }
        }

        let batch_size = self.settings.concurrency.max(1);
        let mut batches: Vec<(&dyn WebSearcher, Vec<ResearchQuery>)> = Vec::new();
        for chunk in keyword_lane.chunks(batch_size) {
            batches.push((self.keyword.as_ref(), chunk.to_vec()));
        }
        if let Some(semantic) = &self.semantic {
            for chunk in semantic_lane.chunks(batch_size) {
                batches.push((semantic.as_ref(), chunk.to_vec()));
            }
        }

        info!(
            queries = total,
            keyword = keyword_lane.len(),
            semantic = semantic_lane.len(),
            batches = batches.len(),
            "Starting research"
        );

        let mut builder = ResearchPool::builder_from(pool);
        let mut outcome_failed = Vec::new();
        let mut cost_by_provider: BTreeMap<String, f64> = BTreeMap::new();
        let mut succeeded = 0;
        let mut done = 0;
        let batch_count = batches.len();
        let delay = Duration::from_millis(self.settings.batch_delay_ms);

        for (index, (searcher, batch)) in batches.into_iter().enumerate() {
            ensure_not_cancelled(token)?;

            let results = join_all(
                batch
                    .iter()
                    .map(|query| self.search_one(searcher, query, topic, token)),
            )
            .await;

            for (query, result) in batch.iter().zip(results) {
                match result {
                    Ok(found) => {
                        *cost_by_provider
                            .entry(found.provider.clone())
                            .or_insert(0.0) += found.cost_usd.unwrap_or(0.0);
                        builder.add(found);
                        succeeded += 1;
                    }
                    Err(_) if token.is_cancelled() => return Err(Cancelled.into()),
                    Err(err) => {
                        warn!(
                            query = %query.query,
                            provider = searcher.name(),
                            error = %format!("{err:#}"),
                            "Research query failed"
                        );
                        outcome_failed.push(FailedQuery {
                            query: query.query.clone(),
                            provider: searcher.name().to_string(),
                            message: format!("{err:#}"),
                        });
                    }
                }
            }

            done += batch.len();
            self.progress.on_research_progress(done, total);

            if index + 1 < batch_count && !delay.is_zero() && !sleep_or_cancel(Some(token), delay).await {
                return Err(Cancelled.into());
            }
        }

        ensure_not_cancelled(token)?;

        let failed = outcome_failed.len();
        info!(succeeded, failed, "Research complete");

        Ok(ResearchOutcome {
            pool: builder.build(),
            succeeded,
            failed,
            failed_queries: outcome_failed,
            cost_by_provider,
        })
    }

    async fn search_one(
        &self,
        searcher: &dyn WebSearcher,
        query: &ResearchQuery,
        topic: &str,
        token: &CancellationToken,
    ) -> Result<CategorizedSearchResult> {
        let options = self.search_options();
        let label = format!("{} search", searcher.name());
        let response = retry_with_backoff(&self.retry, Some(token), Some(&label), || {
            cancellable(token, searcher.search(&query.query, options))
        })
        .await
        .with_context(|| format!("query {:?}", query.query))?;

        let cost = response
            .cost_usd
            .unwrap_or_else(|| self.estimated_cost(searcher));
        let result = to_categorized(query, searcher.name(), response)
            .with_cost(Some(cost))
            .with_captured_at(self.clock.now());
        debug!(
            query = %query.query,
            provider = searcher.name(),
            results = result.results.len(),
            "Search returned"
        );

        // Dropping the cache pass on cancel aborts its in-flight cleaner calls.
        match &self.cache {
            Some(cache) => cancellable(token, async { Ok(cache.process(result, topic).await) }).await,
            None => Ok(result),
        }
    }
}

/// Drop queries already in the pool, then repeats within the batch.
/// First occurrence wins and order is preserved.
fn dedup_against(pool: &ResearchPool, queries: Vec<ResearchQuery>) -> Vec<ResearchQuery> {
    let mut seen = HashSet::new();
    queries
        .into_iter()
        .filter(|q| {
            let key = normalize_query(&q.query);
            !key.is_empty() && !pool.contains_query(&key) && seen.insert(key)
        })
        .collect()
}

/// Provider response in canonical shape. Full page text is preferred over the
/// snippet so the cleaner sees the whole page.
fn to_categorized(
    query: &ResearchQuery,
    provider: &str,
    response: SearchResponse,
) -> CategorizedSearchResult {
    let items = response.results.into_iter().map(|hit| {
        let content = hit
            .raw_content
            .filter(|raw| !raw.trim().is_empty())
            .or(hit.content)
            .unwrap_or_default();
        SearchResultItem::new(hit.title, hit.url, content)
    });
    CategorizedSearchResult::new(query.query.clone(), query.category, provider, items)
        .with_answer(response.answer.filter(|a| !a.trim().is_empty()))
}
