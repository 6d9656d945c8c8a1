use serde::{Deserialize, Serialize};

/// Which routing lane a provider serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Classic keyword/web index search.
    Keyword,
    /// Embedding-based neural search.
    Semantic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

impl SearchDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchDepth::Basic => "basic",
            SearchDepth::Advanced => "advanced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub max_results: u32,
    pub depth: SearchDepth,
    pub include_answer: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 5,
            depth: SearchDepth::Basic,
            include_answer: false,
        }
    }
}

/// One hit in provider-neutral form. `raw_content` is the full page body
/// when the provider returned it; `content` is the provider's snippet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: Option<String>,
    pub raw_content: Option<String>,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub answer: Option<String>,
    pub results: Vec<SearchHit>,
    /// Cost in USD when the provider reports it.
    pub cost_usd: Option<f64>,
}
