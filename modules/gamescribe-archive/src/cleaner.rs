use anyhow::Result;
use async_trait::async_trait;

/// What the cleaner is shown for one page.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRequest {
    pub url: String,
    pub title: String,
    pub raw_content: String,
    /// Subject the page should be relevant to (the game name).
    pub topic: String,
}

/// Cleaned page plus scores. Scores are already clamped to 0-100.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedContent {
    pub content: String,
    pub summary: Option<String>,
    pub key_facts: Vec<String>,
    pub data_points: Vec<String>,
    pub quality_score: u8,
    pub relevance_score: u8,
    /// Fraction (0.0-1.0) of the raw page that was navigation, ads or boilerplate.
    pub junk_ratio: f64,
    pub content_type: String,
}

/// Turns raw page text into article-grade research. Production uses an LLM;
/// tests script the responses.
#[async_trait]
pub trait ContentCleaner: Send + Sync {
    async fn clean(&self, request: &CleanRequest) -> Result<CleanedContent>;

    /// Relevance only, for rows cleaned before relevance scoring existed.
    async fn score_relevance(&self, request: &CleanRequest) -> Result<u8>;
}
