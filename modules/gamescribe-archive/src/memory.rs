use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use crate::model::{
    DomainAggregate, DomainQuality, NewSourceContent, ProviderCounts, StoredSourceContent,
};
use crate::store::SourceStore;

/// In-process store. Used when no `DATABASE_URL` is configured and in tests.
#[derive(Default)]
pub struct MemorySourceStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    sources: HashMap<String, StoredSourceContent>,
    domains: HashMap<String, DomainQuality>,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly, bypassing `insert_if_absent`.
    pub fn with_source(self, row: StoredSourceContent) -> Self {
        self.lock().sources.insert(row.url.clone(), row);
        self
    }

    pub fn source(&self, url: &str) -> Option<StoredSourceContent> {
        self.lock().sources.get(url).cloned()
    }

    pub fn source_count(&self) -> usize {
        self.lock().sources.len()
    }

    pub fn quality(&self, domain: &str) -> Option<DomainQuality> {
        self.lock().domains.get(domain).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-write; the map is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn find_by_urls(&self, urls: &[String]) -> Result<Vec<StoredSourceContent>> {
        let inner = self.lock();
        Ok(urls
            .iter()
            .filter_map(|url| inner.sources.get(url).cloned())
            .collect())
    }

    async fn insert_if_absent(&self, row: &NewSourceContent) -> Result<bool> {
        let mut inner = self.lock();
        if inner.sources.contains_key(&row.url) {
            return Ok(false);
        }
        let now = Utc::now();
        inner.sources.insert(
            row.url.clone(),
            StoredSourceContent {
                url: row.url.clone(),
                domain: row.domain.clone(),
                title: row.title.clone(),
                content: row.content.clone(),
                summary: row.summary.clone(),
                key_facts: row.key_facts.clone(),
                data_points: row.data_points.clone(),
                quality_score: row.quality_score,
                relevance_score: row.relevance_score,
                junk_ratio: row.junk_ratio,
                content_type: row.content_type.clone(),
                provider: row.provider.clone(),
                scrape_succeeded: row.scrape_succeeded,
                stub: row.stub,
                access_count: 0,
                last_accessed_at: now,
                created_at: now,
            },
        );
        Ok(true)
    }

    async fn touch(&self, urls: &[String]) -> Result<()> {
        let mut inner = self.lock();
        let now = Utc::now();
        for url in urls {
            if let Some(row) = inner.sources.get_mut(url) {
                row.access_count += 1;
                row.last_accessed_at = now;
            }
        }
        Ok(())
    }

    async fn update_relevance(&self, url: &str, relevance: u8) -> Result<()> {
        if let Some(row) = self.lock().sources.get_mut(url) {
            if row.relevance_score.is_none() {
                row.relevance_score = Some(relevance);
            }
        }
        Ok(())
    }

    async fn domain_aggregate(&self, domain: &str) -> Result<DomainAggregate> {
        let inner = self.lock();
        let mut agg = DomainAggregate::default();
        let (mut quality_sum, mut relevance_sum) = (0.0, 0.0);

        for row in inner.sources.values().filter(|r| r.domain == domain) {
            agg.total_samples += 1;
            if let Some(q) = row.quality_score {
                agg.quality_samples += 1;
                quality_sum += f64::from(q);
            }
            if let Some(r) = row.relevance_score {
                agg.relevance_samples += 1;
                relevance_sum += f64::from(r);
            }
        }

        agg.avg_quality =
            (agg.quality_samples > 0).then(|| quality_sum / f64::from(agg.quality_samples));
        agg.avg_relevance =
            (agg.relevance_samples > 0).then(|| relevance_sum / f64::from(agg.relevance_samples));
        Ok(agg)
    }

    async fn provider_stats(&self, domain: &str) -> Result<Vec<ProviderCounts>> {
        let inner = self.lock();
        let mut by_provider: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
        for row in inner.sources.values().filter(|r| r.domain == domain) {
            let entry = by_provider.entry(row.provider.as_str()).or_default();
            entry.0 += 1;
            if !row.scrape_succeeded {
                entry.1 += 1;
            }
        }
        Ok(by_provider
            .into_iter()
            .map(|(provider, (attempts, failures))| ProviderCounts {
                provider: provider.to_string(),
                attempts,
                failures,
            })
            .collect())
    }

    async fn upsert_domain_quality(&self, quality: &DomainQuality) -> Result<()> {
        self.lock()
            .domains
            .insert(quality.domain.clone(), quality.clone());
        Ok(())
    }

    async fn domain_quality(&self, domain: &str) -> Result<Option<DomainQuality>> {
        Ok(self.lock().domains.get(domain).cloned())
    }

    async fn excluded_domains(&self) -> Result<Vec<DomainQuality>> {
        let inner = self.lock();
        let mut rows: Vec<DomainQuality> = inner
            .domains
            .values()
            .filter(|q| q.has_any_exclusion())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(url: &str, provider: &str, quality: Option<u8>) -> NewSourceContent {
        NewSourceContent {
            url: url.into(),
            domain: "wiki.example".into(),
            title: "t".into(),
            content: "c".into(),
            summary: None,
            key_facts: vec![],
            data_points: vec![],
            quality_score: quality,
            relevance_score: quality,
            junk_ratio: None,
            content_type: None,
            provider: provider.into(),
            scrape_succeeded: quality.is_some(),
            stub: false,
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_per_url() {
        let store = MemorySourceStore::new();
        assert!(store.insert_if_absent(&row("https://wiki.example/a", "tavily", Some(70))).await.unwrap());
        assert!(!store.insert_if_absent(&row("https://wiki.example/a", "tavily", Some(10))).await.unwrap());
        assert_eq!(store.source_count(), 1);
        assert_eq!(store.source("https://wiki.example/a").unwrap().quality_score, Some(70));
    }

    #[tokio::test]
    async fn aggregates_skip_unscored_rows() {
        let store = MemorySourceStore::new();
        store.insert_if_absent(&row("https://wiki.example/a", "tavily", Some(80))).await.unwrap();
        store.insert_if_absent(&row("https://wiki.example/b", "tavily", Some(60))).await.unwrap();
        store.insert_if_absent(&row("https://wiki.example/c", "exa", None)).await.unwrap();

        let agg = store.domain_aggregate("wiki.example").await.unwrap();
        assert_eq!(agg.total_samples, 3);
        assert_eq!(agg.quality_samples, 2);
        assert_eq!(agg.avg_quality, Some(70.0));

        let stats = store.provider_stats("wiki.example").await.unwrap();
        assert_eq!(
            stats,
            vec![
                ProviderCounts { provider: "exa".into(), attempts: 1, failures: 1 },
                ProviderCounts { provider: "tavily".into(), attempts: 2, failures: 0 },
            ]
        );
    }

    #[tokio::test]
    async fn relevance_repair_never_overwrites() {
        let store = MemorySourceStore::new();
        store.insert_if_absent(&row("https://wiki.example/a", "tavily", Some(80))).await.unwrap();
        store.update_relevance("https://wiki.example/a", 5).await.unwrap();
        assert_eq!(store.source("https://wiki.example/a").unwrap().relevance_score, Some(80));
    }
}
