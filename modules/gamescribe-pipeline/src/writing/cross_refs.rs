use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

fn bold_term_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*([^*\n]{2,60})\*\*").ok())
        .as_ref()
}

/// Topics and terms already introduced by earlier sections. Only used when
/// sections are written one after another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionWriteState {
    pub covered_topics: BTreeSet<String>,
    pub defined_terms: BTreeSet<String>,
}

impl SectionWriteState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.covered_topics.is_empty() && self.defined_terms.is_empty()
    }

    /// Record the section headline, its `###` sub-headings and its bold terms.
    pub fn record_section(&mut self, headline: &str, content: &str) {
        let headline = headline.trim();
        if !headline.is_empty() {
            self.covered_topics.insert(headline.to_string());
        }

        for line in content.lines() {
            if let Some(sub) = line.trim_start().strip_prefix("###") {
                let sub = sub.trim_start_matches('#').trim();
                if !sub.is_empty() {
                    self.covered_topics.insert(sub.to_string());
                }
            }
        }

        if let Some(re) = bold_term_re() {
            for captures in re.captures_iter(content) {
                let term = captures[1].trim();
                if !term.is_empty() {
                    self.defined_terms.insert(term.to_string());
                }
            }
        }
    }

    /// Prompt block for the next section, or `None` when nothing is recorded.
    pub fn to_prompt(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut out = String::new();
        if !self.covered_topics.is_empty() {
            out.push_str("Already covered in earlier sections (reference, do not repeat):\n");
            for topic in &self.covered_topics {
                out.push_str(&format!("- {topic}\n"));
            }
        }
        if !self.defined_terms.is_empty() {
            out.push_str("Terms already defined (use without re-defining):\n");
            for term in &self.defined_terms {
                out.push_str(&format!("- {term}\n"));
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_headline_subheadings_and_bold_terms() {
        let mut state = SectionWriteState::new();
        state.record_section(
            "Combat Basics",
            "Intro text.\n\n### Parrying\nUse **Guard Counter** after a block.\n#### Deep Dive\n**Poise** matters.",
        );

        let topics: Vec<&str> = state.covered_topics.iter().map(String::as_str).collect();
        assert_eq!(topics, vec!["Combat Basics", "Deep Dive", "Parrying"]);
        let terms: Vec<&str> = state.defined_terms.iter().map(String::as_str).collect();
        assert_eq!(terms, vec!["Guard Counter", "Poise"]);
    }

    #[test]
    fn empty_state_produces_no_prompt() {
        let mut state = SectionWriteState::new();
        assert!(state.to_prompt().is_none());
        state.record_section("Lore", "No bold here. ## Not a subheading");
        let prompt = state.to_prompt().unwrap();
        assert!(prompt.contains("- Lore"));
        assert!(!prompt.contains("Terms already defined"));
    }
}
