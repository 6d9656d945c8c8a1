use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Plan (Editor output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArticlePlan {
    /// Article headline.
    pub title: String,
    /// One or two sentence teaser shown in listings.
    pub excerpt: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Sections in reading order.
    pub sections: Vec<PlanSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanSection {
    /// Section heading, unique within the article.
    pub headline: String,
    /// What the section must accomplish for the reader.
    pub goal: String,
    /// Web searches that back this section.
    #[serde(default)]
    pub research_queries: Vec<String>,
    /// Facts, names or topics that must appear in the section.
    #[serde(default)]
    pub must_cover: Vec<String>,
}

// ---------------------------------------------------------------------------
// Draft (Specialist output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftSection {
    pub headline: String,
    /// Markdown body without the section heading.
    pub content: String,
    pub thin_research: bool,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleDraft {
    pub title: String,
    pub excerpt: String,
    pub tags: Vec<String>,
    pub sections: Vec<DraftSection>,
}

impl ArticleDraft {
    pub fn section_index(&self, headline: &str) -> Option<usize> {
        let wanted = headline.trim().to_lowercase();
        self.sections
            .iter()
            .position(|s| s.headline.trim().to_lowercase() == wanted)
    }

    pub fn word_count(&self) -> usize {
        self.sections
            .iter()
            .map(|s| s.content.split_whitespace().count())
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Review (Reviewer output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

/// How the Fixer repairs an issue. Declaration order is application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    /// Rewrite the whole section.
    Regenerate,
    /// A planned topic is missing entirely; write a new section.
    AddSection,
    /// Insert a passage into an existing section.
    InlineInsert,
    /// Small wording or factual edit.
    DirectEdit,
    /// Section is too short; lengthen it.
    Expand,
}

impl FixStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixStrategy::Regenerate => "regenerate",
            FixStrategy::AddSection => "add_section",
            FixStrategy::InlineInsert => "inline_insert",
            FixStrategy::DirectEdit => "direct_edit",
            FixStrategy::Expand => "expand",
        }
    }
}

impl fmt::Display for FixStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewIssue {
    pub severity: Severity,
    /// Short label such as "accuracy", "coverage" or "tone".
    pub category: String,
    /// Headline of the affected section, or null for article-wide issues.
    #[serde(default)]
    pub location: Option<String>,
    pub message: String,
    pub fix_strategy: FixStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewResult {
    pub approved: bool,
    /// Overall score from 0 to 100.
    pub score: u8,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
}

impl ReviewResult {
    pub fn has_critical(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    /// Issues sorted by fix strategy, then severity. Stable within ties.
    pub fn prioritized_issues(&self) -> Vec<&ReviewIssue> {
        let mut issues: Vec<&ReviewIssue> = self.issues.iter().collect();
        issues.sort_by_key(|i| (i.fix_strategy, i.severity));
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(severity: Severity, fix_strategy: FixStrategy, message: &str) -> ReviewIssue {
        ReviewIssue {
            severity,
            category: "coverage".into(),
            location: None,
            message: message.into(),
            fix_strategy,
        }
    }

    #[test]
    fn issues_follow_strategy_order() {
        let review = ReviewResult {
            approved: false,
            score: 55,
            issues: vec![
                issue(Severity::Minor, FixStrategy::Expand, "short"),
                issue(Severity::Major, FixStrategy::DirectEdit, "typo"),
                issue(Severity::Critical, FixStrategy::Regenerate, "wrong game"),
                issue(Severity::Major, FixStrategy::AddSection, "missing bosses"),
                issue(Severity::Critical, FixStrategy::DirectEdit, "wrong date"),
            ],
        };
        let order: Vec<&str> = review
            .prioritized_issues()
            .into_iter()
            .map(|i| i.message.as_str())
            .collect();
        assert_eq!(order, vec!["wrong game", "missing bosses", "wrong date", "typo", "short"]);
        assert!(review.has_critical());
    }

    #[test]
    fn review_parses_from_model_json() {
        let review: ReviewResult = serde_json::from_value(serde_json::json!({
            "approved": false,
            "score": 62,
            "issues": [{
                "severity": "major",
                "category": "coverage",
                "location": "Boss Guide",
                "message": "No mention of phase two",
                "fix_strategy": "inline_insert"
            }]
        }))
        .unwrap();
        assert_eq!(review.issues[0].fix_strategy, FixStrategy::InlineInsert);
        assert_eq!(review.issues[0].location.as_deref(), Some("Boss Guide"));
    }

    #[test]
    fn section_lookup_ignores_case() {
        let draft = ArticleDraft {
            title: "t".into(),
            excerpt: "e".into(),
            tags: vec![],
            sections: vec![DraftSection {
                headline: "Boss Guide".into(),
                content: "one two three".into(),
                thin_research: false,
                sources: vec![],
            }],
        };
        assert_eq!(draft.section_index(" boss guide "), Some(0));
        assert_eq!(draft.section_index("lore"), None);
        assert_eq!(draft.word_count(), 3);
    }
}
