use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gamescribe_common::config::FixerSettings;

use crate::article::{ArticleDraft, ArticlePlan, FixStrategy, PlanSection, ReviewIssue, ReviewResult};
use crate::context::GenerationContext;
use crate::infra::{ensure_not_cancelled, RetryPolicy};
use crate::research::ResearchPool;
use crate::traits::{GenerateRequest, LanguageModel};
use crate::usage::UsageMeter;
use crate::writing::section_writer::tidy_section_body;
use crate::writing::{ParagraphRange, SectionExtras, SectionWriter};

use super::generate_text;
use super::prompts::{fixer_prompt, revision_note, FIXER_SYSTEM};
use super::reviewer::Reviewer;

const STRATEGY_ORDER: [FixStrategy; 5] = [
    FixStrategy::Regenerate,
    FixStrategy::AddSection,
    FixStrategy::InlineInsert,
    FixStrategy::DirectEdit,
    FixStrategy::Expand,
];

/// Section an issue points at: exact headline first, then a headline
/// mentioned inside the location text.
fn locate(draft: &ArticleDraft, location: Option<&str>) -> Option<usize> {
    let location = location?.trim();
    if location.is_empty() {
        return None;
    }
    draft.section_index(location).or_else(|| {
        let lowered = location.to_lowercase();
        draft
            .sections
            .iter()
            .position(|s| {
                let headline = s.headline.trim().to_lowercase();
                !headline.is_empty() && lowered.contains(&headline)
            })
    })
}

#[derive(Debug, Clone)]
pub struct FixOutcome {
    pub plan: ArticlePlan,
    pub draft: ArticleDraft,
    pub review: ReviewResult,
    pub iterations: u32,
}

pub struct Fixer {
    model: Arc<dyn LanguageModel>,
    model_name: String,
    settings: FixerSettings,
    retry: RetryPolicy,
    writer: SectionWriter,
    meter: Arc<UsageMeter>,
}

impl Fixer {
    /// `writer` handles regenerated and added sections and should bill `meter`.
    pub fn new(
        model: Arc<dyn LanguageModel>,
        model_name: impl Into<String>,
        settings: FixerSettings,
        retry: RetryPolicy,
        writer: SectionWriter,
        meter: Arc<UsageMeter>,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            settings,
            retry,
            writer,
            meter,
        }
    }

    /// Fix and re-review until approved, out of applicable fixes, or capped.
    /// The normal cap only extends to the critical cap while a critical
    /// issue is still open.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        ctx: &GenerationContext,
        mut plan: ArticlePlan,
        mut draft: ArticleDraft,
        mut review: ReviewResult,
        pool: &ResearchPool,
        reviewer: &Reviewer,
        token: &CancellationToken,
    ) -> Result<FixOutcome> {
        let mut iterations = 0;

        while !review.approved && !review.issues.is_empty() {
            let cap = if review.has_critical() {
                self.settings.max_critical_iterations
            } else {
                self.settings.max_iterations
            };
            if iterations >= cap {
                info!(iterations, cap, issues = review.issues.len(), "Fix iteration cap reached");
                break;
            }
            ensure_not_cancelled(token)?;

            let applied = self
                .apply_fixes(ctx, &mut plan, &mut draft, &review, pool, token)
                .await?;
            iterations += 1;
            if applied == 0 {
                info!(iterations, "No applicable fixes, stopping");
                break;
            }

            review = reviewer
                .review_metered(ctx, &plan, &draft, token, &self.meter)
                .await
                .with_context(|| format!("re-review after fix iteration {iterations}"))?;
            info!(
                iterations,
                approved = review.approved,
                score = review.score,
                "Fix iteration complete"
            );
        }

        Ok(FixOutcome {
            plan,
            draft,
            review,
            iterations,
        })
    }

    /// Apply one pass of fixes in strategy order. Returns how many sections changed.
    async fn apply_fixes(
        &self,
        ctx: &GenerationContext,
        plan: &mut ArticlePlan,
        draft: &mut ArticleDraft,
        review: &ReviewResult,
        pool: &ResearchPool,
        token: &CancellationToken,
    ) -> Result<usize> {
        let issues = review.prioritized_issues();
        let mut rewritten: HashSet<usize> = HashSet::new();
        let mut changed = 0;

        for strategy in STRATEGY_ORDER {
            let group: Vec<&ReviewIssue> = issues
                .iter()
                .copied()
                .filter(|i| i.fix_strategy == strategy)
                .collect();
            if group.is_empty() {
                continue;
            }

            if strategy == FixStrategy::AddSection {
                for issue in group {
                    if let Some(index) = self.add_section(ctx, plan, draft, issue, pool, token).await? {
                        rewritten.insert(index);
                        changed += 1;
                    }
                }
                continue;
            }

            let mut by_section: BTreeMap<usize, Vec<&ReviewIssue>> = BTreeMap::new();
            for issue in group {
                match locate(draft, issue.location.as_deref()) {
                    Some(index) => by_section.entry(index).or_default().push(issue),
                    None => warn!(
                        strategy = %strategy,
                        location = ?issue.location,
                        message = %issue.message,
                        "Issue has no matching section, skipping"
                    ),
                }
            }

            for (index, section_issues) in by_section {
                if rewritten.contains(&index) {
                    debug!(index, strategy = %strategy, "Section already rewritten this pass");
                    continue;
                }
                ensure_not_cancelled(token)?;
                if strategy == FixStrategy::Regenerate {
                    let note = revision_note(&section_issues);
                    let pacing = self.pacing(ctx, plan);
                    let extras = SectionExtras {
                        revision_note: Some(&note),
                        ..SectionExtras::default()
                    };
                    let section = self
                        .writer
                        .write_section(ctx, plan, index, pool, pacing, extras, token)
                        .await
                        .with_context(|| format!("regenerate section {index}"))?;
                    draft.sections[index] = section;
                    rewritten.insert(index);
                } else {
                    self.edit_section(draft, index, &section_issues, token).await?;
                }
                changed += 1;
            }
        }

        Ok(changed)
    }

    fn pacing(&self, ctx: &GenerationContext, plan: &ArticlePlan) -> ParagraphRange {
        ParagraphRange::for_section(ctx.target_word_count, plan.sections.len(), self.writer.settings())
    }

    async fn add_section(
        &self,
        ctx: &GenerationContext,
        plan: &mut ArticlePlan,
        draft: &mut ArticleDraft,
        issue: &ReviewIssue,
        pool: &ResearchPool,
        token: &CancellationToken,
    ) -> Result<Option<usize>> {
        let headline = issue
            .location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} {}", ctx.game_name.trim(), issue.category.trim()));

        if draft.section_index(&headline).is_some() {
            debug!(headline = %headline, "Section to add already exists");
            return Ok(None);
        }
        ensure_not_cancelled(token)?;

        plan.sections.push(PlanSection {
            headline: headline.clone(),
            goal: issue.message.clone(),
            research_queries: Vec::new(),
            must_cover: Vec::new(),
        });
        let index = plan.sections.len() - 1;
        let pacing = self.pacing(ctx, plan);
        let section = self
            .writer
            .write_section(ctx, plan, index, pool, pacing, SectionExtras::default(), token)
            .await
            .with_context(|| format!("add section {headline:?}"))?;
        draft.sections.push(section);
        info!(headline = %headline, "Section added");
        Ok(Some(index))
    }

    async fn edit_section(
        &self,
        draft: &mut ArticleDraft,
        index: usize,
        issues: &[&ReviewIssue],
        token: &CancellationToken,
    ) -> Result<()> {
        let section = &draft.sections[index];
        let request = GenerateRequest::new("fixer", &self.model_name)
            .system(FIXER_SYSTEM)
            .prompt(fixer_prompt(&section.headline, &section.content, issues))
            .temperature(0.3)
            .max_output_tokens(3_000);

        let revised = generate_text(
            self.model.as_ref(),
            &request,
            &self.retry,
            Some(token),
            &self.meter,
        )
        .await
        .with_context(|| format!("edit section {:?}", section.headline))?;

        let content = tidy_section_body(&revised, &section.headline);
        if content.trim().is_empty() {
            warn!(section = %section.headline, "Fixer returned an empty section, keeping original");
            return Ok(());
        }
        draft.sections[index].content = content;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::DraftSection;

    fn draft(headlines: &[&str]) -> ArticleDraft {
        ArticleDraft {
            title: "t".into(),
            excerpt: "e".into(),
            tags: vec![],
            sections: headlines
                .iter()
                .map(|h| DraftSection {
                    headline: h.to_string(),
                    content: "body".into(),
                    thin_research: false,
                    sources: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn locate_prefers_exact_then_mentioned_headline() {
        let d = draft(&["Bosses", "Boss Rewards"]);
        assert_eq!(locate(&d, Some("boss rewards")), Some(1));
        assert_eq!(locate(&d, Some("Section 2: Boss Rewards")), Some(1));
        assert_eq!(locate(&d, Some("the intro")), None);
        assert_eq!(locate(&d, None), None);
        assert_eq!(locate(&d, Some("  ")), None);
    }
}
