use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use ai_client::truncate_chars;
use gamescribe_archive::{CleanRequest, CleanedContent, ContentCleaner};
use gamescribe_common::clamp_score;

use crate::infra::RetryPolicy;
use crate::traits::{GenerateRequest, LanguageModel};
use crate::usage::UsageMeter;

use super::generate_typed;
use super::prompts::{cleaner_prompt, CLEANER_SYSTEM, RELEVANCE_SYSTEM};

#[derive(Deserialize, JsonSchema)]
struct CleanResponse {
    /// The page's article text with boilerplate removed, as markdown.
    content: String,
    /// Two or three sentence summary.
    summary: String,
    /// Standalone facts useful to a writer.
    #[serde(default)]
    key_facts: Vec<String>,
    /// Numbers, dates, versions, stats.
    #[serde(default)]
    data_points: Vec<String>,
    /// 0-100.
    quality_score: f64,
    /// 0-100.
    relevance_score: f64,
    /// 0.0-1.0 share of the raw page that was junk.
    junk_ratio: f64,
    /// guide, review, news, wiki, forum, store or other.
    content_type: String,
}

#[derive(Deserialize, JsonSchema)]
struct RelevanceResponse {
    /// 0-100.
    relevance_score: f64,
}

/// Source cleaner backed by the cleaner model. It holds no run token because
/// the cache outlives runs; the scheduler races each cache pass against the
/// run's token instead.
pub struct LlmContentCleaner {
    model: Arc<dyn LanguageModel>,
    model_name: String,
    max_input_chars: usize,
    retry: RetryPolicy,
    meter: Arc<UsageMeter>,
}

impl LlmContentCleaner {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        model_name: impl Into<String>,
        max_input_chars: usize,
        meter: Arc<UsageMeter>,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            max_input_chars,
            retry: RetryPolicy::once(),
            meter,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn meter(&self) -> &Arc<UsageMeter> {
        &self.meter
    }

    fn request(&self, system: &str, request: &CleanRequest, max_output_tokens: u32) -> GenerateRequest {
        let raw = truncate_chars(&request.raw_content, self.max_input_chars);
        GenerateRequest::new("cleaner", &self.model_name)
            .system(system)
            .prompt(cleaner_prompt(&request.topic, &request.url, &request.title, raw))
            .temperature(0.0)
            .max_output_tokens(max_output_tokens)
    }
}

#[async_trait]
impl ContentCleaner for LlmContentCleaner {
    async fn clean(&self, request: &CleanRequest) -> Result<CleanedContent> {
        let generate = self.request(CLEANER_SYSTEM, request, 4_096);
        let response: CleanResponse =
            generate_typed(self.model.as_ref(), &generate, &self.retry, None, &self.meter).await?;

        let summary = response.summary.trim();
        Ok(CleanedContent {
            content: response.content.trim().to_string(),
            summary: (!summary.is_empty()).then(|| summary.to_string()),
            key_facts: response.key_facts,
            data_points: response.data_points,
            quality_score: clamp_score(response.quality_score),
            relevance_score: clamp_score(response.relevance_score),
            junk_ratio: if response.junk_ratio.is_finite() {
                response.junk_ratio.clamp(0.0, 1.0)
            } else {
                0.0
            },
            content_type: response.content_type.trim().to_lowercase(),
        })
    }

    async fn score_relevance(&self, request: &CleanRequest) -> Result<u8> {
        let generate = self.request(RELEVANCE_SYSTEM, request, 256);
        let response: RelevanceResponse =
            generate_typed(self.model.as_ref(), &generate, &self.retry, None, &self.meter).await?;
        Ok(clamp_score(response.relevance_score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;

    fn request(raw: &str) -> CleanRequest {
        CleanRequest {
            url: "https://wiki.com/margit".into(),
            title: "Margit".into(),
            raw_content: raw.into(),
            topic: "Elden Ring".into(),
        }
    }

    #[tokio::test]
    async fn scores_are_clamped_and_input_truncated() {
        let model = Arc::new(ScriptedModel::new().with_object("cleaner", |_| {
            Ok(serde_json::json!({
                "content": " Margit is the first major boss. ",
                "summary": "",
                "key_facts": ["Weak to bleed"],
                "data_points": [],
                "quality_score": 130.4,
                "relevance_score": 72.6,
                "junk_ratio": 1.7,
                "content_type": " Wiki "
            }))
        }));
        let meter = Arc::new(UsageMeter::new());
        let cleaner = LlmContentCleaner::new(model.clone(), "haiku", 10, meter.clone());

        let cleaned = cleaner.clean(&request("0123456789abcdef")).await.unwrap();
        assert_eq!(cleaned.quality_score, 100);
        assert_eq!(cleaned.relevance_score, 73);
        assert_eq!(cleaned.junk_ratio, 1.0);
        assert_eq!(cleaned.summary, None);
        assert_eq!(cleaned.content_type, "wiki");
        assert_eq!(cleaned.content, "Margit is the first major boss.");

        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].prompt.ends_with("0123456789"));
        assert_eq!(meter.totals().llm_calls, 1);
    }

    #[tokio::test]
    async fn relevance_repair_uses_the_small_schema() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_object("cleaner", |_| Ok(serde_json::json!({ "relevance_score": 41.0 }))),
        );
        let cleaner = LlmContentCleaner::new(model, "haiku", 1_000, Arc::new(UsageMeter::new()));
        assert_eq!(cleaner.score_relevance(&request("page")).await.unwrap(), 41);
    }
}
