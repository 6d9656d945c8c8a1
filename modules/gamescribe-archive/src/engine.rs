// Source cache: pre-fetch exclusion, cache lookup, scrape floor, cleaning
// and post-clean filtering for one provider result set.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gamescribe_common::config::{CacheSettings, DomainSettings};
use gamescribe_common::{extract_domain, CategorizedSearchResult, SearchResultItem};

use crate::cleaner::{CleanRequest, CleanedContent, ContentCleaner};
use crate::error::Result;
use crate::exclusion::{ExclusionReason, ExclusionSet};
use crate::model::{NewSourceContent, StoredSourceContent};
use crate::store::SourceStore;
use crate::writer::{BackgroundWriter, WriteJob, WriteQueue};

/// Result of looking one candidate URL up.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(StoredSourceContent),
    /// `raw: None` means the domain is excluded and nothing may be fetched or cleaned.
    Miss { raw: Option<String> },
}

/// What happens to a freshly cleaned source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanOutcome {
    /// Stored in full and handed to the writers.
    Surface,
    /// Stored as a domain-tracking stub, not surfaced.
    Stub,
    /// Below the storage floor. Only the scores are kept so the domain
    /// aggregate still counts the page; never surfaced or re-cleaned.
    Discard,
}

pub fn classify(relevance: u8, quality: u8, settings: &CacheSettings) -> CleanOutcome {
    if relevance >= settings.display_min_relevance && quality >= settings.display_min_quality {
        CleanOutcome::Surface
    } else if relevance >= settings.storage_min_relevance
        && quality >= settings.storage_min_quality
    {
        CleanOutcome::Stub
    } else {
        CleanOutcome::Discard
    }
}

/// Per-call tallies, logged after every result set.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub excluded: usize,
    pub hits: usize,
    pub hits_surfaced: usize,
    pub scrape_failures: usize,
    pub cleaned: usize,
    pub clean_failures: usize,
    pub stubs: usize,
    pub discarded: usize,
}

pub struct SourceCache {
    store: Arc<dyn SourceStore>,
    cleaner: Arc<dyn ContentCleaner>,
    exclusions: Arc<ExclusionSet>,
    writes: WriteQueue,
    settings: CacheSettings,
    /// Legacy URLs already queued for relevance repair by this process.
    pending_repairs: Mutex<HashSet<String>>,
}

impl SourceCache {
    pub fn new(
        store: Arc<dyn SourceStore>,
        cleaner: Arc<dyn ContentCleaner>,
        exclusions: Arc<ExclusionSet>,
        writes: WriteQueue,
        settings: CacheSettings,
    ) -> Self {
        Self {
            store,
            cleaner,
            exclusions,
            writes,
            settings,
            pending_repairs: Mutex::new(HashSet::new()),
        }
    }

    /// Load learned exclusions, spawn the background writer, and build the cache.
    pub async fn start(
        store: Arc<dyn SourceStore>,
        cleaner: Arc<dyn ContentCleaner>,
        cache_settings: CacheSettings,
        domain_settings: DomainSettings,
    ) -> Result<(Self, JoinHandle<()>)> {
        let exclusions = Arc::new(
            ExclusionSet::load(&domain_settings.static_exclusions, store.as_ref()).await?,
        );
        let (writes, handle) = BackgroundWriter::new(
            store.clone(),
            Some(cleaner.clone()),
            exclusions.clone(),
            domain_settings,
        )
        .spawn();
        Ok((
            Self::new(store, cleaner, exclusions, writes, cache_settings),
            handle,
        ))
    }

    pub fn exclusions(&self) -> &Arc<ExclusionSet> {
        &self.exclusions
    }

    pub fn writes(&self) -> &WriteQueue {
        &self.writes
    }

    /// Look each item up. Excluded domains short-circuit to `Miss { raw: None }`
    /// before the store is consulted. Output order matches input order.
    pub async fn lookup(
        &self,
        items: &[SearchResultItem],
        provider: &str,
    ) -> Result<Vec<CacheLookup>> {
        let mut lookups: Vec<Option<CacheLookup>> = Vec::with_capacity(items.len());
        let mut candidates = Vec::new();

        for item in items {
            if let Some(reason) = self.exclusion(&item.url, provider) {
                debug!(url = item.url.as_str(), provider, ?reason, "Skipping excluded domain");
                lookups.push(Some(CacheLookup::Miss { raw: None }));
            } else {
                candidates.push(item.url.clone());
                lookups.push(None);
            }
        }

        let mut found: HashMap<String, StoredSourceContent> = if candidates.is_empty() {
            HashMap::new()
        } else {
            self.store
                .find_by_urls(&candidates)
                .await?
                .into_iter()
                .map(|row| (row.url.clone(), row))
                .collect()
        };

        let hit_urls: Vec<String> = found.keys().cloned().collect();
        if !hit_urls.is_empty() {
            self.writes.enqueue(WriteJob::Touch(hit_urls));
        }

        Ok(items
            .iter()
            .zip(lookups)
            .map(|(item, pre)| {
                pre.unwrap_or_else(|| match found.remove(&item.url) {
                    Some(row) => CacheLookup::Hit(row),
                    None => CacheLookup::Miss {
                        raw: Some(item.content.clone()),
                    },
                })
            })
            .collect())
    }

    fn exclusion(&self, url: &str, provider: &str) -> Option<ExclusionReason> {
        let domain = domain_of(url)?;
        self.exclusions.check(&domain, provider)
    }

    /// Run a fresh provider result set through the cache. Excluded, stubbed
    /// and discarded items are dropped; surviving items carry cleaned content
    /// and scores where available. Store failures degrade to the raw results.
    pub async fn process(&self, result: CategorizedSearchResult, topic: &str) -> CategorizedSearchResult {
        let provider = result.provider.clone();
        let lookups = match self.lookup(&result.results, &provider).await {
            Ok(lookups) => lookups,
            Err(e) => {
                warn!(query = result.query.as_str(), error = %e, "Source cache lookup failed; using raw results");
                let kept: Vec<SearchResultItem> = result
                    .results
                    .iter()
                    .filter(|item| self.exclusion(&item.url, &provider).is_none())
                    .cloned()
                    .collect();
                return result.with_results(kept);
            }
        };

        let mut stats = CacheStats::default();
        let mut slots: Vec<Option<SearchResultItem>> = Vec::with_capacity(lookups.len());
        let mut to_clean: Vec<(usize, SearchResultItem, String)> = Vec::new();

        for (index, (item, lookup)) in result.results.iter().zip(lookups).enumerate() {
            match lookup {
                CacheLookup::Miss { raw: None } => {
                    stats.excluded += 1;
                    slots.push(None);
                }
                CacheLookup::Hit(row) => {
                    stats.hits += 1;
                    let surfaced = self.surface_hit(item, row, topic);
                    if surfaced.is_some() {
                        stats.hits_surfaced += 1;
                    }
                    slots.push(surfaced);
                }
                CacheLookup::Miss { raw: Some(raw) } => {
                    if raw.chars().count() < self.settings.min_scrape_chars {
                        stats.scrape_failures += 1;
                        self.record_scrape_failure(item, &provider, raw.chars().count());
                        slots.push(Some(unscored(item.clone())));
                    } else {
                        to_clean.push((index, item.clone(), raw));
                        slots.push(None);
                    }
                }
            }
        }

        let cleaned = join_all(to_clean.into_iter().map(|(index, item, raw)| async move {
            let request = CleanRequest {
                url: item.url.clone(),
                title: item.title.clone(),
                raw_content: raw,
                topic: topic.to_string(),
            };
            let outcome = self.cleaner.clean(&request).await;
            (index, item, outcome)
        }))
        .await;

        for (index, item, outcome) in cleaned {
            match outcome {
                Ok(cleaned) => {
                    stats.cleaned += 1;
                    match classify(cleaned.relevance_score, cleaned.quality_score, &self.settings) {
                        CleanOutcome::Surface => {
                            self.store_cleaned(&item, &provider, &cleaned, false);
                            slots[index] = Some(apply_cleaned(item, cleaned));
                        }
                        CleanOutcome::Stub => {
                            stats.stubs += 1;
                            self.store_cleaned(&item, &provider, &cleaned, true);
                        }
                        CleanOutcome::Discard => {
                            stats.discarded += 1;
                            self.store_cleaned(&item, &provider, &cleaned, true);
                        }
                    }
                }
                Err(e) => {
                    stats.clean_failures += 1;
                    warn!(url = item.url.as_str(), error = %e, "Cleaning failed; keeping raw content");
                    slots[index] = Some(unscored(item));
                }
            }
        }

        info!(
            query = result.query.as_str(),
            provider = provider.as_str(),
            excluded = stats.excluded,
            hits = stats.hits,
            hits_surfaced = stats.hits_surfaced,
            scrape_failures = stats.scrape_failures,
            cleaned = stats.cleaned,
            clean_failures = stats.clean_failures,
            stubs = stats.stubs,
            discarded = stats.discarded,
            "Source cache pass"
        );

        let kept: Vec<SearchResultItem> = slots.into_iter().flatten().collect();
        result.with_results(kept)
    }

    /// Full rows clearing the display thresholds are surfaced. Legacy rows
    /// without relevance assume the default and get queued for repair.
    fn surface_hit(
        &self,
        item: &SearchResultItem,
        row: StoredSourceContent,
        topic: &str,
    ) -> Option<SearchResultItem> {
        if !row.is_surfaceable() {
            return None;
        }

        let relevance = match row.relevance_score {
            Some(r) => r,
            None => {
                if self.claim_repair(&row.url) {
                    self.writes.enqueue(WriteJob::RepairRelevance {
                        domain: row.domain.clone(),
                        request: CleanRequest {
                            url: row.url.clone(),
                            title: row.title.clone(),
                            raw_content: row.content.clone(),
                            topic: topic.to_string(),
                        },
                    });
                }
                self.settings.legacy_default_relevance
            }
        };
        let quality = row.quality_score?;

        if relevance < self.settings.display_min_relevance
            || quality < self.settings.display_min_quality
        {
            return None;
        }

        Some(SearchResultItem {
            title: if row.title.is_empty() {
                item.title.clone()
            } else {
                row.title
            },
            url: row.url,
            content: row.content,
            summary: row.summary,
            key_facts: row.key_facts,
            data_points: row.data_points,
            relevance_score: Some(relevance),
            quality_score: Some(quality),
            from_cache: true,
        })
    }

    /// True the first time a URL is seen for repair. Later hits on the same
    /// legacy row reuse the queued job.
    fn claim_repair(&self, url: &str) -> bool {
        self.pending_repairs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string())
    }

    fn record_scrape_failure(&self, item: &SearchResultItem, provider: &str, raw_chars: usize) {
        let Some(domain) = domain_of(&item.url) else {
            return;
        };
        debug!(url = item.url.as_str(), raw_chars, "Below scrape floor");
        self.writes.enqueue(WriteJob::Store(NewSourceContent::scrape_failure(
            item.url.clone(),
            domain,
            item.title.clone(),
            provider,
            raw_chars,
        )));
    }

    fn store_cleaned(
        &self,
        item: &SearchResultItem,
        provider: &str,
        cleaned: &CleanedContent,
        scores_only: bool,
    ) {
        let Some(domain) = domain_of(&item.url) else {
            return;
        };
        let row = NewSourceContent {
            url: item.url.clone(),
            domain,
            title: item.title.clone(),
            content: cleaned.content.clone(),
            summary: cleaned.summary.clone(),
            key_facts: cleaned.key_facts.clone(),
            data_points: cleaned.data_points.clone(),
            quality_score: Some(cleaned.quality_score),
            relevance_score: Some(cleaned.relevance_score),
            junk_ratio: Some(cleaned.junk_ratio),
            content_type: Some(cleaned.content_type.clone()),
            provider: provider.to_string(),
            scrape_succeeded: true,
            stub: false,
        };
        self.writes
            .enqueue(WriteJob::Store(if scores_only { row.into_stub() } else { row }));
    }
}

fn domain_of(url: &str) -> Option<String> {
    let domain = extract_domain(url);
    (!domain.is_empty()).then_some(domain)
}

fn unscored(mut item: SearchResultItem) -> SearchResultItem {
    item.relevance_score = None;
    item.quality_score = None;
    item.from_cache = false;
    item
}

fn apply_cleaned(mut item: SearchResultItem, cleaned: CleanedContent) -> SearchResultItem {
    item.content = cleaned.content;
    item.summary = cleaned.summary;
    item.key_facts = cleaned.key_facts;
    item.data_points = cleaned.data_points;
    item.relevance_score = Some(cleaned.relevance_score);
    item.quality_score = Some(cleaned.quality_score);
    item.from_cache = false;
    item
}
