use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::article::{ArticleDraft, ArticlePlan, ReviewResult};
use crate::context::GenerationContext;
use crate::infra::RetryPolicy;
use crate::traits::{GenerateRequest, LanguageModel};
use crate::usage::UsageMeter;

use super::generate_typed;
use super::prompts::{reviewer_prompt, REVIEWER_SYSTEM};

pub struct Reviewer {
    model: Arc<dyn LanguageModel>,
    model_name: String,
    retry: RetryPolicy,
    max_sources: usize,
    meter: Arc<UsageMeter>,
}

impl Reviewer {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        model_name: impl Into<String>,
        retry: RetryPolicy,
        max_sources: usize,
        meter: Arc<UsageMeter>,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            retry,
            max_sources,
            meter,
        }
    }

    pub async fn review(
        &self,
        ctx: &GenerationContext,
        plan: &ArticlePlan,
        draft: &ArticleDraft,
        token: &CancellationToken,
    ) -> Result<ReviewResult> {
        self.review_metered(ctx, plan, draft, token, &self.meter).await
    }

    /// Same as [`Reviewer::review`] but bills a different meter, for
    /// re-reviews inside the fix loop.
    pub async fn review_metered(
        &self,
        ctx: &GenerationContext,
        plan: &ArticlePlan,
        draft: &ArticleDraft,
        token: &CancellationToken,
        meter: &UsageMeter,
    ) -> Result<ReviewResult> {
        let markdown = draft.to_markdown(self.max_sources);
        let request = GenerateRequest::new("reviewer", &self.model_name)
            .system(REVIEWER_SYSTEM)
            .prompt(reviewer_prompt(ctx, plan, &markdown))
            .temperature(0.2)
            .max_output_tokens(2_048);

        let mut review: ReviewResult = generate_typed(
            self.model.as_ref(),
            &request,
            &self.retry,
            Some(token),
            meter,
        )
        .await
        .context("review")?;
        review.score = review.score.min(100);

        info!(
            approved = review.approved,
            score = review.score,
            issues = review.issues.len(),
            critical = review.has_critical(),
            "Review complete"
        );
        Ok(review)
    }
}
