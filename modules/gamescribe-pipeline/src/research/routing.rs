use gamescribe_common::ArticleCategory;

/// Phrases that mark an explanatory question better served by neural search.
const SEMANTIC_MARKERS: &[&str] = &[
    "how to",
    "guide to",
    "what is the",
    "explain",
    "why does",
    "best way to",
    "tips for",
    "strategy for",
];

pub fn is_semantic_query(query: &str) -> bool {
    let lowered = query.to_lowercase();
    SEMANTIC_MARKERS.iter().any(|marker| lowered.contains(marker))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Keyword,
    Semantic,
}

/// Decides which provider serves each query for one article.
#[derive(Debug, Clone, Copy)]
pub struct QueryRouter {
    semantic_enabled: bool,
}

impl QueryRouter {
    /// Routing is on only when the category opts in and a semantic provider exists.
    pub fn new(
        category: ArticleCategory,
        routing_categories: &[ArticleCategory],
        semantic_available: bool,
    ) -> Self {
        Self {
            semantic_enabled: semantic_available && routing_categories.contains(&category),
        }
    }

    pub fn keyword_only() -> Self {
        Self {
            semantic_enabled: false,
        }
    }

    pub fn semantic_enabled(&self) -> bool {
        self.semantic_enabled
    }

    pub fn route(&self, query: &str) -> Lane {
        if self.semantic_enabled && is_semantic_query(query) {
            Lane::Semantic
        } else {
            Lane::Keyword
        }
    }
}
