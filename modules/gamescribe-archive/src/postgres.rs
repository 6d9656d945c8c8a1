// Postgres persistence for cached sources and domain aggregates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;

use crate::error::{ArchiveError, Result};
use crate::model::{
    DomainAggregate, DomainQuality, DomainTier, NewSourceContent, ProviderCounts, ProviderStats,
    StoredSourceContent,
};
use crate::store::SourceStore;

pub struct PgSourceStore {
    pool: PgPool,
}

/// A row from the source_contents table.
#[derive(Debug, sqlx::FromRow)]
struct SourceContentRow {
    url: String,
    domain: String,
    title: String,
    content: String,
    summary: Option<String>,
    key_facts: Json<Vec<String>>,
    data_points: Json<Vec<String>>,
    quality_score: Option<i16>,
    relevance_score: Option<i16>,
    junk_ratio: Option<f64>,
    content_type: Option<String>,
    provider: String,
    scrape_succeeded: bool,
    stub: bool,
    access_count: i64,
    last_accessed_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<SourceContentRow> for StoredSourceContent {
    fn from(r: SourceContentRow) -> Self {
        Self {
            url: r.url,
            domain: r.domain,
            title: r.title,
            content: r.content,
            summary: r.summary,
            key_facts: r.key_facts.0,
            data_points: r.data_points.0,
            quality_score: r.quality_score.and_then(score_from_db),
            relevance_score: r.relevance_score.and_then(score_from_db),
            junk_ratio: r.junk_ratio,
            content_type: r.content_type,
            provider: r.provider,
            scrape_succeeded: r.scrape_succeeded,
            stub: r.stub,
            access_count: r.access_count,
            last_accessed_at: r.last_accessed_at,
            created_at: r.created_at,
        }
    }
}

/// A row from the domain_qualities table.
#[derive(Debug, sqlx::FromRow)]
struct DomainQualityRow {
    domain: String,
    avg_quality: Option<f64>,
    avg_relevance: Option<f64>,
    total_samples: i32,
    quality_samples: i32,
    relevance_samples: i32,
    tier: String,
    is_excluded: bool,
    exclusion_reason: Option<String>,
    provider_stats: Json<Vec<ProviderStats>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DomainQualityRow> for DomainQuality {
    type Error = ArchiveError;

    fn try_from(r: DomainQualityRow) -> Result<Self> {
        let tier = r
            .tier
            .parse::<DomainTier>()
            .map_err(|message| ArchiveError::CorruptRow {
                key: r.domain.clone(),
                message,
            })?;
        Ok(Self {
            domain: r.domain,
            avg_quality: r.avg_quality,
            avg_relevance: r.avg_relevance,
            total_samples: count_from_db(r.total_samples),
            quality_samples: count_from_db(r.quality_samples),
            relevance_samples: count_from_db(r.relevance_samples),
            tier,
            is_excluded: r.is_excluded,
            exclusion_reason: r.exclusion_reason,
            provider_stats: r.provider_stats.0,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AggregateRow {
    total_samples: i32,
    quality_samples: i32,
    avg_quality: Option<f64>,
    relevance_samples: i32,
    avg_relevance: Option<f64>,
}

#[derive(Debug, sqlx::FromRow)]
struct ProviderCountRow {
    provider: String,
    attempts: i32,
    failures: i32,
}

fn score_from_db(v: i16) -> Option<u8> {
    u8::try_from(v.clamp(0, 100)).ok()
}

fn count_from_db(v: i32) -> u32 {
    u32::try_from(v).unwrap_or(0)
}

fn count_to_db(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

impl PgSourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Source cache migrations applied");
        Ok(())
    }
}

const SOURCE_COLUMNS: &str = "url, domain, title, content, summary, key_facts, data_points, \
     quality_score, relevance_score, junk_ratio, content_type, provider, scrape_succeeded, \
     stub, access_count, last_accessed_at, created_at";

#[async_trait]
impl SourceStore for PgSourceStore {
    async fn find_by_urls(&self, urls: &[String]) -> Result<Vec<StoredSourceContent>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM source_contents WHERE url = ANY($1)");
        let rows = sqlx::query_as::<_, SourceContentRow>(&sql)
            .bind(urls)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_if_absent(&self, row: &NewSourceContent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO source_contents
                (url, domain, title, content, summary, key_facts, data_points,
                 quality_score, relevance_score, junk_ratio, content_type,
                 provider, scrape_succeeded, stub)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(&row.url)
        .bind(&row.domain)
        .bind(&row.title)
        .bind(&row.content)
        .bind(&row.summary)
        .bind(Json(&row.key_facts))
        .bind(Json(&row.data_points))
        .bind(row.quality_score.map(i16::from))
        .bind(row.relevance_score.map(i16::from))
        .bind(row.junk_ratio)
        .bind(&row.content_type)
        .bind(&row.provider)
        .bind(row.scrape_succeeded)
        .bind(row.stub)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn touch(&self, urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE source_contents
            SET access_count = access_count + 1, last_accessed_at = now()
            WHERE url = ANY($1)
            "#,
        )
        .bind(urls)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_relevance(&self, url: &str, relevance: u8) -> Result<()> {
        sqlx::query(
            "UPDATE source_contents SET relevance_score = $2 WHERE url = $1 AND relevance_score IS NULL",
        )
        .bind(url)
        .bind(i16::from(relevance))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn domain_aggregate(&self, domain: &str) -> Result<DomainAggregate> {
        let row = sqlx::query_as::<_, AggregateRow>(
            r#"
            SELECT
                COUNT(*)::INT4                  AS total_samples,
                COUNT(quality_score)::INT4      AS quality_samples,
                AVG(quality_score)::FLOAT8      AS avg_quality,
                COUNT(relevance_score)::INT4    AS relevance_samples,
                AVG(relevance_score)::FLOAT8    AS avg_relevance
            FROM source_contents
            WHERE domain = $1
            "#,
        )
        .bind(domain)
        .fetch_one(&self.pool)
        .await?;

        Ok(DomainAggregate {
            total_samples: count_from_db(row.total_samples),
            quality_samples: count_from_db(row.quality_samples),
            avg_quality: row.avg_quality,
            relevance_samples: count_from_db(row.relevance_samples),
            avg_relevance: row.avg_relevance,
        })
    }

    async fn provider_stats(&self, domain: &str) -> Result<Vec<ProviderCounts>> {
        let rows = sqlx::query_as::<_, ProviderCountRow>(
            r#"
            SELECT
                provider,
                COUNT(*)::INT4                                        AS attempts,
                (COUNT(*) FILTER (WHERE NOT scrape_succeeded))::INT4  AS failures
            FROM source_contents
            WHERE domain = $1
            GROUP BY provider
            ORDER BY provider
            "#,
        )
        .bind(domain)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ProviderCounts {
                provider: r.provider,
                attempts: count_from_db(r.attempts),
                failures: count_from_db(r.failures),
            })
            .collect())
    }

    async fn upsert_domain_quality(&self, q: &DomainQuality) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO domain_qualities
                (domain, avg_quality, avg_relevance, total_samples, quality_samples,
                 relevance_samples, tier, is_excluded, exclusion_reason, provider_stats, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (domain) DO UPDATE SET
                avg_quality       = EXCLUDED.avg_quality,
                avg_relevance     = EXCLUDED.avg_relevance,
                total_samples     = EXCLUDED.total_samples,
                quality_samples   = EXCLUDED.quality_samples,
                relevance_samples = EXCLUDED.relevance_samples,
                tier              = EXCLUDED.tier,
                is_excluded       = EXCLUDED.is_excluded,
                exclusion_reason  = EXCLUDED.exclusion_reason,
                provider_stats    = EXCLUDED.provider_stats,
                updated_at        = EXCLUDED.updated_at
            "#,
        )
        .bind(&q.domain)
        .bind(q.avg_quality)
        .bind(q.avg_relevance)
        .bind(count_to_db(q.total_samples))
        .bind(count_to_db(q.quality_samples))
        .bind(count_to_db(q.relevance_samples))
        .bind(q.tier.as_str())
        .bind(q.is_excluded)
        .bind(&q.exclusion_reason)
        .bind(Json(&q.provider_stats))
        .bind(q.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn domain_quality(&self, domain: &str) -> Result<Option<DomainQuality>> {
        let row = sqlx::query_as::<_, DomainQualityRow>(
            "SELECT * FROM domain_qualities WHERE domain = $1",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DomainQuality::try_from).transpose()
    }

    async fn excluded_domains(&self) -> Result<Vec<DomainQuality>> {
        let rows = sqlx::query_as::<_, DomainQualityRow>(
            r#"
            SELECT * FROM domain_qualities
            WHERE is_excluded OR provider_stats @> '[{"is_excluded": true}]'::jsonb
            ORDER BY domain
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DomainQuality::try_from).collect()
    }
}
