// Fixed prompt set for the five agents and the source cleaner.

use crate::article::{ArticlePlan, PlanSection, ReviewIssue};
use crate::context::GenerationContext;
use crate::writing::{ParagraphRange, SectionWriteState};

// ---------------------------------------------------------------------------
// Scout
// ---------------------------------------------------------------------------

pub const SCOUT_SYSTEM: &str = "\
You are a games research analyst. From the search results provided, write a \
concise briefing for an editor who will plan an article. Cover what the game \
is, who makes it, its current state (recent patches, DLC, reception), and the \
facts most useful for the requested article type. Only state facts supported \
by the research. Flag anything contradictory or uncertain.";

pub fn scout_briefing_prompt(ctx: &GenerationContext, research: &str) -> String {
    format!(
        "{}\n## Research\n\n{}\n\nWrite the briefing as plain markdown, at most 500 words.",
        ctx.describe(),
        research
    )
}

// ---------------------------------------------------------------------------
// Editor
// ---------------------------------------------------------------------------

pub const EDITOR_SYSTEM: &str = "\
You are the editor of a games publication. Plan one article: a title, a short \
excerpt, a few tags, and an ordered list of sections. Every section needs a \
unique headline, a concrete goal, the web searches that would back it, and the \
elements it must cover. Search queries should be specific and include the game \
name. Do not plan an introduction-only or conclusion-only section without a goal.";

pub fn editor_prompt(
    ctx: &GenerationContext,
    briefing: &str,
    min_sections: usize,
    max_sections: usize,
    max_queries: usize,
    previous_errors: &[String],
) -> String {
    let mut prompt = format!(
        "{}\n## Briefing\n\n{}\n\nPlan between {min_sections} and {max_sections} sections, \
         each with 1 to {max_queries} research queries.",
        ctx.describe(),
        briefing.trim()
    );
    if !previous_errors.is_empty() {
        prompt.push_str("\n\nYour previous plan was rejected. Fix every problem:\n");
        for error in previous_errors {
            prompt.push_str(&format!("- {error}\n"));
        }
    }
    prompt
}

// ---------------------------------------------------------------------------
// Specialist
// ---------------------------------------------------------------------------

pub const SPECIALIST_SYSTEM: &str = "\
You are a specialist games writer. Write one section of a longer article in \
markdown. Do not repeat the section headline; start directly with the body. \
Use ### for any sub-headings and **bold** for key terms the first time they \
are introduced. Ground every claim in the research provided. Never invent \
patch numbers, dates, or statistics.";

pub struct SectionPromptParts<'a> {
    pub ctx: &'a GenerationContext,
    pub plan: &'a ArticlePlan,
    pub index: usize,
    pub section: &'a PlanSection,
    pub research: &'a str,
    pub thin_research: bool,
    pub paragraphs: ParagraphRange,
    pub previous_tail: Option<&'a str>,
    pub cross_refs: Option<&'a SectionWriteState>,
    pub revision_note: Option<&'a str>,
}

pub fn section_prompt(parts: &SectionPromptParts<'_>) -> String {
    let outline = parts
        .plan
        .sections
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let marker = if i == parts.index { " <- this section" } else { "" };
            format!("{}. {}{marker}", i + 1, s.headline)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!(
        "{}\nArticle: {}\n\n## Outline\n{}\n\n## Section\nHeadline: {}\nGoal: {}\n",
        parts.ctx.describe(),
        parts.plan.title,
        outline,
        parts.section.headline,
        parts.section.goal,
    );
    if !parts.section.must_cover.is_empty() {
        prompt.push_str("Must cover:\n");
        for item in &parts.section.must_cover {
            prompt.push_str(&format!("- {item}\n"));
        }
    }
    prompt.push_str(&format!("Length: {}.\n", parts.paragraphs.describe()));

    if let Some(tail) = parts.previous_tail.filter(|t| !t.trim().is_empty()) {
        prompt.push_str(&format!(
            "\n## End of the previous section\n{}\n\nContinue naturally from it.\n",
            tail.trim()
        ));
    }
    if let Some(block) = parts.cross_refs.and_then(SectionWriteState::to_prompt) {
        prompt.push('\n');
        prompt.push_str(&block);
    }
    if parts.thin_research {
        prompt.push_str(
            "\nResearch for this section is thin. Stay general where facts are missing \
             and do not speculate.\n",
        );
    }
    if let Some(note) = parts.revision_note.filter(|n| !n.trim().is_empty()) {
        prompt.push_str(&format!("\n## Reviewer feedback to address\n{}\n", note.trim()));
    }
    prompt.push_str(&format!("\n## Research\n\n{}", parts.research));
    prompt
}

// ---------------------------------------------------------------------------
// Reviewer
// ---------------------------------------------------------------------------

pub const REVIEWER_SYSTEM: &str = "\
You are a senior games editor reviewing a draft against its plan. Score it from \
0 to 100 and approve it only if it is accurate, complete, and publishable. List \
every problem as an issue with a severity, a short category, the headline of \
the affected section (or null for article-wide issues), a message, and the fix \
strategy that would repair it: regenerate a broken section, add_section for a \
missing planned topic, inline_insert for a missing passage, direct_edit for a \
small correction, expand for a section that is too short.";

pub fn reviewer_prompt(ctx: &GenerationContext, plan: &ArticlePlan, markdown: &str) -> String {
    let plan_outline = plan
        .sections
        .iter()
        .map(|s| format!("- {}: {}", s.headline, s.goal))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{}\n## Plan\n{}\n\n## Draft\n\n{}",
        ctx.describe(),
        plan_outline,
        markdown
    )
}

// ---------------------------------------------------------------------------
// Fixer
// ---------------------------------------------------------------------------

pub const FIXER_SYSTEM: &str = "\
You revise one section of a games article. Return the complete revised section \
body in markdown, without its headline. Keep everything that is not affected \
by the requested change.";

pub fn fixer_prompt(headline: &str, content: &str, issues: &[&ReviewIssue]) -> String {
    let mut prompt = format!("## Section: {headline}\n\n{}\n\n## Requested changes\n", content.trim());
    for issue in issues {
        prompt.push_str(&format!(
            "- [{}] {}: {}\n",
            issue.fix_strategy, issue.category, issue.message
        ));
    }
    prompt
}

pub fn revision_note(issues: &[&ReviewIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("- {}: {}", i.category, i.message))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Source cleaner
// ---------------------------------------------------------------------------

pub const CLEANER_SYSTEM: &str = "\
You clean scraped web pages for a games research pipeline. Remove navigation, \
ads, cookie banners, comments, and boilerplate. Keep the article text. Then \
summarize it, list key facts and concrete data points, and score it: quality \
(0-100, how accurate, specific, and well written the page is) and relevance \
(0-100, how useful it is for writing about the given game). Estimate the junk \
ratio (0.0-1.0) of the raw page and label its content type (guide, review, \
news, wiki, forum, store, other).";

pub fn cleaner_prompt(topic: &str, url: &str, title: &str, raw: &str) -> String {
    format!("Game: {topic}\nURL: {url}\nTitle: {title}\n\n## Raw page\n\n{raw}")
}

pub const RELEVANCE_SYSTEM: &str = "\
Score how useful a web page is for writing about the given game, from 0 (unrelated) \
to 100 (directly about the game and its current state).";
