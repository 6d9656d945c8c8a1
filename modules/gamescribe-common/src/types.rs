use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::normalize_url;

// --- Article category ---

/// Editorial category of the article being generated. Drives writing mode,
/// cross-reference tracking and the Scout's category-specific queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleCategory {
    News,
    Review,
    Guide,
    List,
}

impl ArticleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleCategory::News => "news",
            ArticleCategory::Review => "review",
            ArticleCategory::Guide => "guide",
            ArticleCategory::List => "list",
        }
    }

    /// Parallel section writing is the default for categories whose sections
    /// stand alone (news items, list entries).
    pub fn default_parallel_writing(&self) -> bool {
        matches!(self, ArticleCategory::News | ArticleCategory::List)
    }

    /// Guides and reviews build on earlier sections, so later sections need
    /// to know which terms and topics were already introduced.
    pub fn tracks_cross_references(&self) -> bool {
        matches!(self, ArticleCategory::Guide | ArticleCategory::Review)
    }
}

impl fmt::Display for ArticleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArticleCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "news" => Ok(ArticleCategory::News),
            "review" | "reviews" => Ok(ArticleCategory::Review),
            "guide" | "guides" => Ok(ArticleCategory::Guide),
            "list" | "lists" => Ok(ArticleCategory::List),
            other => Err(format!("unknown article category: {other}")),
        }
    }
}

// --- Research ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchCategory {
    /// Broad background on the game. Always attached to section research.
    Overview,
    /// Queries specific to the article category (a guide's mechanics, a review's reception).
    CategorySpecific,
    /// Recent news and patches.
    Recent,
    /// Queries requested by a plan section. Kept out of the category lists.
    SectionSpecific,
}

impl ResearchCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchCategory::Overview => "overview",
            ResearchCategory::CategorySpecific => "category_specific",
            ResearchCategory::Recent => "recent",
            ResearchCategory::SectionSpecific => "section_specific",
        }
    }
}

/// One search hit after normalization, optionally enriched by the cleaner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub title: String,
    /// Normalized URL (see [`normalize_url`]).
    pub url: String,
    pub content: String,
    pub summary: Option<String>,
    #[serde(default)]
    pub key_facts: Vec<String>,
    #[serde(default)]
    pub data_points: Vec<String>,
    /// 0-100, `None` when unscored.
    pub relevance_score: Option<u8>,
    /// 0-100, `None` when unscored.
    pub quality_score: Option<u8>,
    /// Served from the source cache rather than freshly fetched.
    pub from_cache: bool,
}

impl SearchResultItem {
    pub fn new(title: impl Into<String>, url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            content: content.into(),
            summary: None,
            key_facts: Vec::new(),
            data_points: Vec::new(),
            relevance_score: None,
            quality_score: None,
            from_cache: false,
        }
    }

    /// Compact text used as writing context: summary and facts when the
    /// source was cleaned, otherwise the raw content.
    pub fn research_text(&self) -> String {
        let mut out = String::new();
        if let Some(summary) = self.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            out.push_str(summary.trim());
            out.push('\n');
        }
        for fact in &self.key_facts {
            out.push_str("- ");
            out.push_str(fact.trim());
            out.push('\n');
        }
        for point in &self.data_points {
            out.push_str("- ");
            out.push_str(point.trim());
            out.push('\n');
        }
        if out.is_empty() {
            out.push_str(self.content.trim());
        }
        out
    }
}

/// Results of one query to one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizedSearchResult {
    pub query: String,
    pub answer: Option<String>,
    pub results: Vec<SearchResultItem>,
    pub category: ResearchCategory,
    pub captured_at: DateTime<Utc>,
    pub provider: String,
    pub cost_usd: Option<f64>,
}

impl CategorizedSearchResult {
    /// Build a result set. Items whose URL is not a valid http(s) URL are
    /// dropped; the rest get their URL normalized and duplicates are removed
    /// (first occurrence wins).
    pub fn new(
        query: impl Into<String>,
        category: ResearchCategory,
        provider: impl Into<String>,
        items: impl IntoIterator<Item = SearchResultItem>,
    ) -> Self {
        let mut seen = HashSet::new();
        let results = items
            .into_iter()
            .filter_map(|mut item| {
                let url = normalize_url(&item.url)?;
                if !seen.insert(url.clone()) {
                    return None;
                }
                item.url = url;
                Some(item)
            })
            .collect();

        Self {
            query: query.into(),
            answer: None,
            results,
            category,
            captured_at: Utc::now(),
            provider: provider.into(),
            cost_usd: None,
        }
    }

    pub fn with_answer(mut self, answer: Option<String>) -> Self {
        self.answer = answer;
        self
    }

    pub fn with_cost(mut self, cost_usd: Option<f64>) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Replace the items, re-applying the normalization invariant.
    pub fn with_results(mut self, items: Vec<SearchResultItem>) -> Self {
        let rebuilt = Self::new(self.query.clone(), self.category, self.provider.clone(), items);
        self.results = rebuilt.results;
        self
    }
}

// --- Usage accounting ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

impl std::ops::Add for TokenUsage {
    type Output = TokenUsage;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

/// Clamp an LLM-reported score into 0-100.
pub fn clamp_score(raw: f64) -> u8 {
    if !raw.is_finite() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(url: &str) -> SearchResultItem {
        SearchResultItem::new("t", url, "c")
    }

    #[test]
    fn construction_drops_invalid_and_duplicate_urls() {
        let result = CategorizedSearchResult::new(
            "q",
            ResearchCategory::Overview,
            "tavily",
            vec![
                item("https://a.com/p#one"),
                item("ftp://files.example/x"),
                item("https://a.com/p#two"),
                item("https://b.com/"),
            ],
        );
        let urls: Vec<&str> = result.results.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.com/p", "https://b.com/"]);
    }

    #[test]
    fn category_defaults() {
        assert!(ArticleCategory::News.default_parallel_writing());
        assert!(!ArticleCategory::Guide.default_parallel_writing());
        assert!(ArticleCategory::Review.tracks_cross_references());
        assert!(!ArticleCategory::List.tracks_cross_references());
        assert_eq!("Guides".parse::<ArticleCategory>(), Ok(ArticleCategory::Guide));
        assert!("essay".parse::<ArticleCategory>().is_err());
    }

    #[test]
    fn research_text_prefers_cleaned_fields() {
        let mut i = item("https://a.com");
        i.content = "raw page".into();
        assert_eq!(i.research_text(), "raw page");
        i.summary = Some("Summary.".into());
        i.key_facts = vec!["Fact one".into()];
        assert_eq!(i.research_text(), "Summary.\n- Fact one\n");
    }

    #[test]
    fn score_clamping() {
        assert_eq!(clamp_score(104.2), 100);
        assert_eq!(clamp_score(-3.0), 0);
        assert_eq!(clamp_score(f64::NAN), 0);
        assert_eq!(clamp_score(72.6), 73);
    }
}
