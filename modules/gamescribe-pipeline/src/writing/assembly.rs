use std::collections::HashSet;

use crate::article::{ArticleDraft, SourceRef};

/// Section bodies may only use `###` and deeper so the document keeps one
/// `#` title and `##` section headings.
fn demote_headings(body: &str) -> String {
    body.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let hashes = trimmed.chars().take_while(|c| *c == '#').count();
            let is_heading = (1..=2).contains(&hashes)
                && trimmed[hashes..].starts_with(char::is_whitespace);
            if is_heading {
                format!("###{}", &trimmed[hashes..])
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sources across all sections in section order, first occurrence per URL,
/// at most `max_sources`.
pub fn collect_sources(draft: &ArticleDraft, max_sources: usize) -> Vec<SourceRef> {
    let mut seen = HashSet::new();
    draft
        .sections
        .iter()
        .flat_map(|s| s.sources.iter())
        .filter(|source| seen.insert(source.url.clone()))
        .take(max_sources)
        .cloned()
        .collect()
}

pub fn render_markdown(draft: &ArticleDraft, max_sources: usize) -> String {
    let mut out = format!("# {}\n\n", draft.title.trim());
    if !draft.excerpt.trim().is_empty() {
        out.push_str(&format!("*{}*\n\n", draft.excerpt.trim()));
    }

    for section in &draft.sections {
        out.push_str(&format!("## {}\n\n", section.headline.trim()));
        let body = demote_headings(section.content.trim());
        if !body.is_empty() {
            out.push_str(&body);
            out.push_str("\n\n");
        }
    }

    let sources = collect_sources(draft, max_sources);
    if !sources.is_empty() {
        out.push_str("## Sources\n\n");
        for source in sources {
            let title = if source.title.trim().is_empty() {
                source.url.as_str()
            } else {
                source.title.trim()
            };
            out.push_str(&format!("- [{}]({})\n", title, source.url));
        }
    }

    out.trim_end().to_string() + "\n"
}

impl ArticleDraft {
    pub fn to_markdown(&self, max_sources: usize) -> String {
        render_markdown(self, max_sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::DraftSection;

    fn source(n: usize) -> SourceRef {
        SourceRef {
            title: format!("Source {n}"),
            url: format!("https://site{n}.com/page"),
        }
    }

    fn draft() -> ArticleDraft {
        ArticleDraft {
            title: "Elden Ring Boss Guide".into(),
            excerpt: "Every major boss, ranked.".into(),
            tags: vec![],
            sections: vec![
                DraftSection {
                    headline: "Margit".into(),
                    content: "# Stray title\nText about Margit.\n## Phase two\nMore.".into(),
                    thin_research: false,
                    sources: vec![source(1), source(2)],
                },
                DraftSection {
                    headline: "Godrick".into(),
                    content: "### Grafting\n#hashtag stays".into(),
                    thin_research: true,
                    sources: vec![source(2), source(3)],
                },
            ],
        }
    }

    #[test]
    fn one_title_and_demoted_body_headings() {
        let md = draft().to_markdown(20);
        assert_eq!(md.lines().filter(|l| l.starts_with("# ")).count(), 1);
        let sections: Vec<&str> = md.lines().filter(|l| l.starts_with("## ")).collect();
        assert_eq!(sections, vec!["## Margit", "## Godrick", "## Sources"]);
        assert!(md.contains("### Stray title"));
        assert!(md.contains("### Phase two"));
        assert!(md.contains("#hashtag stays"));
    }

    #[test]
    fn sources_are_deduplicated_and_capped() {
        let d = draft();
        let all = collect_sources(&d, 20);
        assert_eq!(all.len(), 3);
        assert_eq!(collect_sources(&d, 2), vec![source(1), source(2)]);

        let md = d.to_markdown(2);
        assert!(md.trim_end().ends_with("- [Source 2](https://site2.com/page)"));
        assert!(!md.contains("site3.com"));
    }
}
