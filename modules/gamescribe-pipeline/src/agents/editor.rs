use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ai_client::StructuredOutput;
use gamescribe_common::config::EditorSettings;
use gamescribe_common::{is_cancellation, normalize_query, Cancelled, GenerationError};

use crate::article::ArticlePlan;
use crate::context::GenerationContext;
use crate::infra::RetryPolicy;
use crate::traits::{GenerateRequest, LanguageModel};
use crate::usage::UsageMeter;

use super::generate_value;
use super::prompts::{editor_prompt, EDITOR_SYSTEM};

/// Structural checks on a plan. Returns every problem found.
pub fn validate_plan(plan: &ArticlePlan, settings: &EditorSettings) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if plan.title.trim().is_empty() {
        errors.push("title must not be blank".to_string());
    }

    let count = plan.sections.len();
    if count < settings.min_sections || count > settings.max_sections {
        errors.push(format!(
            "plan must have between {} and {} sections, got {count}",
            settings.min_sections, settings.max_sections
        ));
    }

    let mut headlines = HashSet::new();
    for (i, section) in plan.sections.iter().enumerate() {
        let n = i + 1;
        let headline = normalize_query(&section.headline);
        if headline.is_empty() {
            errors.push(format!("section {n} has a blank headline"));
        } else if !headlines.insert(headline) {
            errors.push(format!("section {n} repeats the headline {:?}", section.headline.trim()));
        }
        if section.goal.trim().is_empty() {
            errors.push(format!("section {n} has a blank goal"));
        }

        let queries = section
            .research_queries
            .iter()
            .filter(|q| !q.trim().is_empty())
            .count();
        if queries < settings.min_queries_per_section || queries > settings.max_queries_per_section {
            errors.push(format!(
                "section {n} must have between {} and {} research queries, got {queries}",
                settings.min_queries_per_section, settings.max_queries_per_section
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub struct Editor {
    model: Arc<dyn LanguageModel>,
    model_name: String,
    settings: EditorSettings,
    retry: RetryPolicy,
    meter: Arc<UsageMeter>,
}

impl Editor {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        model_name: impl Into<String>,
        settings: EditorSettings,
        retry: RetryPolicy,
        meter: Arc<UsageMeter>,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            settings,
            retry,
            meter,
        }
    }

    /// Produce a validated plan. Rejected plans are retried with the errors
    /// fed back; once retries run out the run fails with `EditorFailed`.
    pub async fn plan(
        &self,
        ctx: &GenerationContext,
        briefing: &str,
        token: &CancellationToken,
    ) -> Result<ArticlePlan> {
        let attempts = self.settings.max_retries + 1;
        let schema = ArticlePlan::tool_schema();
        let mut errors: Vec<String> = Vec::new();

        for attempt in 1..=attempts {
            if token.is_cancelled() {
                return Err(Cancelled.into());
            }

            let request = GenerateRequest::new("editor", &self.model_name)
                .system(EDITOR_SYSTEM)
                .prompt(editor_prompt(
                    ctx,
                    briefing,
                    self.settings.min_sections,
                    self.settings.max_sections,
                    self.settings.max_queries_per_section,
                    &errors,
                ))
                .temperature(0.4)
                .max_output_tokens(4_096);

            let value = match generate_value(
                self.model.as_ref(),
                &request,
                &schema,
                &self.retry,
                Some(token),
                &self.meter,
            )
            .await
            {
                Ok(value) => value,
                Err(err) if is_cancellation(&err) || token.is_cancelled() => {
                    return Err(Cancelled.into())
                }
                Err(err) => return Err(err.context("editor plan request")),
            };

            errors = match serde_json::from_value::<ArticlePlan>(value) {
                Ok(plan) => match validate_plan(&plan, &self.settings) {
                    Ok(()) => {
                        info!(
                            attempt,
                            title = %plan.title,
                            sections = plan.sections.len(),
                            "Plan accepted"
                        );
                        return Ok(plan);
                    }
                    Err(errors) => errors,
                },
                Err(err) => vec![format!("plan did not match the schema: {err}")],
            };

            warn!(attempt, attempts, errors = ?errors, "Plan rejected");
        }

        Err(GenerationError::EditorFailed { attempts, errors }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::PlanSection;

    fn section(headline: &str, goal: &str, queries: usize) -> PlanSection {
        PlanSection {
            headline: headline.into(),
            goal: goal.into(),
            research_queries: (0..queries).map(|i| format!("query {i}")).collect(),
            must_cover: vec![],
        }
    }

    fn plan(sections: Vec<PlanSection>) -> ArticlePlan {
        ArticlePlan {
            title: "Title".into(),
            excerpt: "Excerpt".into(),
            tags: vec![],
            sections,
        }
    }

    #[test]
    fn valid_plan_passes() {
        let p = plan(vec![
            section("One", "a", 1),
            section("Two", "b", 2),
            section("Three", "c", 5),
        ]);
        assert!(validate_plan(&p, &EditorSettings::default()).is_ok());
    }

    #[test]
    fn every_violation_is_listed() {
        let p = plan(vec![
            section("Bosses", "a", 1),
            section("  bosses ", "   ", 0),
            section("Builds", "c", 6),
        ]);
        let errors = validate_plan(&p, &EditorSettings::default()).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors[0].contains("repeats the headline"));
        assert!(errors[1].contains("blank goal"));
        assert!(errors[2].contains("got 0"));
        assert!(errors[3].contains("got 6"));
    }

    #[test]
    fn section_count_bounds_are_enforced() {
        let p = plan(vec![section("One", "a", 1), section("Two", "b", 1)]);
        let errors = validate_plan(&p, &EditorSettings::default()).unwrap_err();
        assert_eq!(errors, vec!["plan must have between 3 and 10 sections, got 2"]);
    }
}
