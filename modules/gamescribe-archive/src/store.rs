// Persistence boundary for the source cache.
//
// PgSourceStore backs production runs; MemorySourceStore covers runs without
// a database and every test. Both must be idempotent per URL so that the
// background writer can replay jobs safely.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    DomainAggregate, DomainQuality, NewSourceContent, ProviderCounts, StoredSourceContent,
};

#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Batch lookup by normalized URL. Unknown URLs are simply absent.
    async fn find_by_urls(&self, urls: &[String]) -> Result<Vec<StoredSourceContent>>;

    /// Insert unless a row for the URL already exists. Returns whether a row was written.
    async fn insert_if_absent(&self, row: &NewSourceContent) -> Result<bool>;

    /// Bump access count and last-accessed time for each URL.
    async fn touch(&self, urls: &[String]) -> Result<()>;

    /// Fill in a previously absent relevance score.
    async fn update_relevance(&self, url: &str, relevance: u8) -> Result<()>;

    /// Averages and counts over every row of the domain.
    async fn domain_aggregate(&self, domain: &str) -> Result<DomainAggregate>;

    /// Attempt/failure counts per provider for the domain.
    async fn provider_stats(&self, domain: &str) -> Result<Vec<ProviderCounts>>;

    async fn upsert_domain_quality(&self, quality: &DomainQuality) -> Result<()>;

    async fn domain_quality(&self, domain: &str) -> Result<Option<DomainQuality>>;

    /// Domains excluded globally or for at least one provider.
    async fn excluded_domains(&self) -> Result<Vec<DomainQuality>>;
}
