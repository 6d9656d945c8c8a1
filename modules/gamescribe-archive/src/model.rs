use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Source content rows
// ---------------------------------------------------------------------------

/// One cached source, keyed by normalized URL.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSourceContent {
    pub url: String,
    pub domain: String,
    pub title: String,
    /// Cleaned content. Empty for stubs, a diagnostic placeholder for scrape failures.
    pub content: String,
    pub summary: Option<String>,
    pub key_facts: Vec<String>,
    pub data_points: Vec<String>,
    pub quality_score: Option<u8>,
    pub relevance_score: Option<u8>,
    pub junk_ratio: Option<f64>,
    pub content_type: Option<String>,
    pub provider: String,
    pub scrape_succeeded: bool,
    /// Domain-tracking row stored without its cleaned content.
    pub stub: bool,
    pub access_count: i64,
    pub last_accessed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl StoredSourceContent {
    /// A full, successfully cleaned row that may be surfaced to writers.
    pub fn is_surfaceable(&self) -> bool {
        self.scrape_succeeded && !self.stub
    }

    /// Cleaned before relevance scoring existed.
    pub fn needs_relevance_repair(&self) -> bool {
        self.is_surfaceable() && self.relevance_score.is_none()
    }
}

/// Parameters for inserting a source row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSourceContent {
    pub url: String,
    pub domain: String,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub key_facts: Vec<String>,
    pub data_points: Vec<String>,
    pub quality_score: Option<u8>,
    pub relevance_score: Option<u8>,
    pub junk_ratio: Option<f64>,
    pub content_type: Option<String>,
    pub provider: String,
    pub scrape_succeeded: bool,
    pub stub: bool,
}

impl NewSourceContent {
    /// Permanent record of a page whose raw content was too short to clean.
    pub fn scrape_failure(
        url: impl Into<String>,
        domain: impl Into<String>,
        title: impl Into<String>,
        provider: impl Into<String>,
        raw_chars: usize,
    ) -> Self {
        Self {
            url: url.into(),
            domain: domain.into(),
            title: title.into(),
            content: format!("[scrape failed: {raw_chars} characters of raw content]"),
            summary: None,
            key_facts: Vec::new(),
            data_points: Vec::new(),
            quality_score: None,
            relevance_score: None,
            junk_ratio: None,
            content_type: None,
            provider: provider.into(),
            scrape_succeeded: false,
            stub: false,
        }
    }

    /// Strip the cleaned payload, keeping only what domain statistics need.
    pub fn into_stub(mut self) -> Self {
        self.content = String::new();
        self.summary = None;
        self.key_facts.clear();
        self.data_points.clear();
        self.stub = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Domain aggregates
// ---------------------------------------------------------------------------

/// Averages and counts over every stored row of one domain.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DomainAggregate {
    pub total_samples: u32,
    pub quality_samples: u32,
    pub avg_quality: Option<f64>,
    pub relevance_samples: u32,
    pub avg_relevance: Option<f64>,
}

/// Attempt/failure counts for one (domain, provider) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCounts {
    pub provider: String,
    pub attempts: u32,
    pub failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainTier {
    Excellent,
    Good,
    Average,
    Poor,
    Excluded,
}

impl DomainTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainTier::Excellent => "excellent",
            DomainTier::Good => "good",
            DomainTier::Average => "average",
            DomainTier::Poor => "poor",
            DomainTier::Excluded => "excluded",
        }
    }
}

impl fmt::Display for DomainTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "excellent" => Ok(DomainTier::Excellent),
            "good" => Ok(DomainTier::Good),
            "average" => Ok(DomainTier::Average),
            "poor" => Ok(DomainTier::Poor),
            "excluded" => Ok(DomainTier::Excluded),
            other => Err(format!("unknown domain tier: {other}")),
        }
    }
}

/// Per-provider scrape reliability for a domain. Serialized into the
/// `provider_stats` JSONB column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub provider: String,
    pub attempts: u32,
    pub failures: u32,
    pub is_excluded: bool,
    pub exclusion_reason: Option<String>,
}

impl ProviderStats {
    pub fn failure_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            f64::from(self.failures) / f64::from(self.attempts)
        }
    }
}

/// Derived quality record for a domain. Always rebuilt from scratch.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainQuality {
    pub domain: String,
    pub avg_quality: Option<f64>,
    pub avg_relevance: Option<f64>,
    pub total_samples: u32,
    pub quality_samples: u32,
    pub relevance_samples: u32,
    pub tier: DomainTier,
    pub is_excluded: bool,
    pub exclusion_reason: Option<String>,
    pub provider_stats: Vec<ProviderStats>,
    pub updated_at: DateTime<Utc>,
}

impl DomainQuality {
    pub fn has_any_exclusion(&self) -> bool {
        self.is_excluded || self.provider_stats.iter().any(|p| p.is_excluded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_drops_cleaned_payload() {
        let row = NewSourceContent {
            url: "https://a.com/x".into(),
            domain: "a.com".into(),
            title: "X".into(),
            content: "cleaned body".into(),
            summary: Some("s".into()),
            key_facts: vec!["f".into()],
            data_points: vec![],
            quality_score: Some(35),
            relevance_score: Some(40),
            junk_ratio: Some(0.2),
            content_type: Some("article".into()),
            provider: "tavily".into(),
            scrape_succeeded: true,
            stub: false,
        }
        .into_stub();

        assert!(row.stub);
        assert!(row.content.is_empty());
        assert!(row.key_facts.is_empty());
        assert_eq!(row.quality_score, Some(35));
    }

    #[test]
    fn scrape_failure_is_unscored() {
        let row = NewSourceContent::scrape_failure("https://a.com", "a.com", "", "exa", 12);
        assert!(!row.scrape_succeeded);
        assert!(row.quality_score.is_none() && row.relevance_score.is_none());
        assert!(row.content.contains("12 characters"));
    }

    #[test]
    fn tier_round_trips_through_text() {
        for tier in [DomainTier::Excellent, DomainTier::Poor, DomainTier::Excluded] {
            assert_eq!(tier.as_str().parse::<DomainTier>(), Ok(tier));
        }
    }
}
