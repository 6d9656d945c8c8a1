use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gamescribe_common::{normalize_query, CategorizedSearchResult, ResearchCategory};

/// Frozen snapshot of the research gathered so far in one run.
///
/// Top-level lists are immutable `Arc` slices; the results inside are shared
/// with every later snapshot rather than copied.
#[derive(Debug, Clone)]
pub struct ResearchPool {
    overview: Arc<[Arc<CategorizedSearchResult>]>,
    category_specific: Arc<[Arc<CategorizedSearchResult>]>,
    recent: Arc<[Arc<CategorizedSearchResult>]>,
    seen_urls: Arc<HashSet<String>>,
    by_query: Arc<HashMap<String, Arc<CategorizedSearchResult>>>,
    /// Normalized queries in insertion order.
    query_order: Arc<[String]>,
}

impl Default for ResearchPool {
    fn default() -> Self {
        ResearchPoolBuilder::new().build()
    }
}

impl ResearchPool {
    pub fn builder() -> ResearchPoolBuilder {
        ResearchPoolBuilder::new()
    }

    /// Re-open a snapshot for the next stage. The snapshot itself is untouched.
    pub fn builder_from(pool: &ResearchPool) -> ResearchPoolBuilder {
        ResearchPoolBuilder {
            overview: pool.overview.to_vec(),
            category_specific: pool.category_specific.to_vec(),
            recent: pool.recent.to_vec(),
            seen_urls: pool.seen_urls.as_ref().clone(),
            by_query: pool.by_query.as_ref().clone(),
            query_order: pool.query_order.to_vec(),
        }
    }

    pub fn overview(&self) -> &[Arc<CategorizedSearchResult>] {
        &self.overview
    }

    pub fn category_specific(&self) -> &[Arc<CategorizedSearchResult>] {
        &self.category_specific
    }

    pub fn recent(&self) -> &[Arc<CategorizedSearchResult>] {
        &self.recent
    }

    pub fn seen_urls(&self) -> &HashSet<String> {
        &self.seen_urls
    }

    pub fn get(&self, query: &str) -> Option<&Arc<CategorizedSearchResult>> {
        self.by_query.get(&normalize_query(query))
    }

    pub fn contains_query(&self, query: &str) -> bool {
        self.by_query.contains_key(&normalize_query(query))
    }

    pub fn query_count(&self) -> usize {
        self.by_query.len()
    }

    pub fn url_count(&self) -> usize {
        self.seen_urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_query.is_empty()
    }

    /// Every result, in the order it was added.
    pub fn all_results(&self) -> impl Iterator<Item = &Arc<CategorizedSearchResult>> {
        self.query_order
            .iter()
            .filter_map(|query| self.by_query.get(query))
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.all_results().filter_map(|r| r.cost_usd).sum()
    }
}

/// Mutable side of [`ResearchPool`]. First write per normalized query wins.
#[derive(Debug, Default)]
pub struct ResearchPoolBuilder {
    overview: Vec<Arc<CategorizedSearchResult>>,
    category_specific: Vec<Arc<CategorizedSearchResult>>,
    recent: Vec<Arc<CategorizedSearchResult>>,
    seen_urls: HashSet<String>,
    by_query: HashMap<String, Arc<CategorizedSearchResult>>,
    query_order: Vec<String>,
}

impl ResearchPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a result. Returns `false` (and changes nothing) when a result for
    /// the same normalized query is already present.
    pub fn add(&mut self, result: CategorizedSearchResult) -> bool {
        let key = normalize_query(&result.query);
        if self.by_query.contains_key(&key) {
            return false;
        }

        self.seen_urls
            .extend(result.results.iter().map(|item| item.url.clone()));

        let result = Arc::new(result);
        match result.category {
            ResearchCategory::Overview => self.overview.push(result.clone()),
            ResearchCategory::CategorySpecific => self.category_specific.push(result.clone()),
            ResearchCategory::Recent => self.recent.push(result.clone()),
            ResearchCategory::SectionSpecific => {}
        }
        self.query_order.push(key.clone());
        self.by_query.insert(key, result);
        true
    }

    pub fn contains_query(&self, query: &str) -> bool {
        self.by_query.contains_key(&normalize_query(query))
    }

    pub fn query_count(&self) -> usize {
        self.by_query.len()
    }

    pub fn build(self) -> ResearchPool {
        ResearchPool {
            overview: self.overview.into(),
            category_specific: self.category_specific.into(),
            recent: self.recent.into(),
            seen_urls: Arc::new(self.seen_urls),
            by_query: Arc::new(self.by_query),
            query_order: self.query_order.into(),
        }
    }
}

/// Results for `queries` (normalized, unmatched skipped, repeats collapsed),
/// followed by every overview result when `include_overview` is set.
pub fn extract_research_for_queries<S: AsRef<str>>(
    queries: &[S],
    pool: &ResearchPool,
    include_overview: bool,
) -> Vec<Arc<CategorizedSearchResult>> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for query in queries {
        let key = normalize_query(query.as_ref());
        if !taken.insert(key.clone()) {
            continue;
        }
        if let Some(result) = pool.by_query.get(&key) {
            out.push(result.clone());
        }
    }

    if include_overview {
        for result in pool.overview() {
            if taken.insert(normalize_query(&result.query)) {
                out.push(result.clone());
            }
        }
    }

    out
}
