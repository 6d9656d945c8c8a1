// Trait abstractions for pipeline dependencies.
//
// LanguageModel stands in for the Claude client, WebSearcher for the Tavily
// and Exa clients, ProgressReporter and Clock for the caller's telemetry and
// wall clock. Tests swap every one of them for the mocks in `testing`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ai_client::{Claude, CompletionRequest};
use gamescribe_common::TokenUsage;
use search_client::{ExaClient, ProviderKind, SearchOptions, SearchResponse, TavilyClient};

use crate::usage::Stage;

// ---------------------------------------------------------------------------
// LanguageModel
// ---------------------------------------------------------------------------

/// One LLM call. `agent` labels the caller in logs and lets test doubles
/// route requests per stage.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub agent: &'static str,
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_output_tokens: u32,
}

impl GenerateRequest {
    pub fn new(agent: &'static str, model: impl Into<String>) -> Self {
        Self {
            agent,
            model: model.into(),
            system: String::new(),
            prompt: String::new(),
            temperature: None,
            max_output_tokens: 4096,
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = max;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TextGeneration {
    pub text: String,
    pub usage: TokenUsage,
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ObjectGeneration {
    pub value: serde_json::Value,
    pub usage: TokenUsage,
    pub cost_usd: Option<f64>,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate_text(&self, request: &GenerateRequest) -> Result<TextGeneration>;

    /// Schema-constrained generation. Returns the raw JSON value so the trait
    /// stays object-safe; callers deserialize.
    async fn generate_object(
        &self,
        request: &GenerateRequest,
        schema: serde_json::Value,
    ) -> Result<ObjectGeneration>;
}

fn completion_request(request: &GenerateRequest) -> CompletionRequest {
    let mut completion = CompletionRequest::new(request.system.clone(), request.prompt.clone());
    completion.model = Some(request.model.clone());
    completion.temperature = request.temperature;
    completion.max_tokens = request.max_output_tokens;
    completion
}

#[async_trait]
impl LanguageModel for Claude {
    async fn generate_text(&self, request: &GenerateRequest) -> Result<TextGeneration> {
        let completion = self.complete(&completion_request(request)).await?;
        Ok(TextGeneration {
            text: completion.text,
            usage: TokenUsage::new(
                u64::from(completion.usage.input_tokens),
                u64::from(completion.usage.output_tokens),
            ),
            cost_usd: completion.cost_usd,
        })
    }

    async fn generate_object(
        &self,
        request: &GenerateRequest,
        schema: serde_json::Value,
    ) -> Result<ObjectGeneration> {
        let extraction = self
            .extract_value(&completion_request(request), schema)
            .await?;
        Ok(ObjectGeneration {
            value: extraction.value,
            usage: TokenUsage::new(
                u64::from(extraction.usage.input_tokens),
                u64::from(extraction.usage.output_tokens),
            ),
            cost_usd: extraction.cost_usd,
        })
    }
}

// ---------------------------------------------------------------------------
// WebSearcher
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WebSearcher: Send + Sync {
    /// Stable provider identifier used in logs, cost keys and source rows.
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResponse>;
}

#[async_trait]
impl WebSearcher for TavilyClient {
    fn name(&self) -> &str {
        "tavily"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Keyword
    }

    async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResponse> {
        Ok(TavilyClient::search(self, query, options).await?)
    }
}

#[async_trait]
impl WebSearcher for ExaClient {
    fn name(&self) -> &str {
        "exa"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Semantic
    }

    async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResponse> {
        Ok(ExaClient::search(self, query, options).await?)
    }
}

// ---------------------------------------------------------------------------
// ProgressReporter
// ---------------------------------------------------------------------------

/// Caller-facing progress callbacks. Invoked inline, so implementations must
/// return quickly. Every method defaults to a no-op.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, _stage: Stage, _percent: u8, _detail: Option<&str>) {}

    fn on_section_progress(&self, _done: usize, _total: usize, _label: &str) {}

    fn on_research_progress(&self, _done: usize, _total: usize) {}
}

pub struct NoopProgress;

impl ProgressReporter for NoopProgress {}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    /// Wall-clock time, used for capture timestamps.
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds elapsed since `since`, used for stage durations.
    fn elapsed_ms(&self, since: DateTime<Utc>) -> u64 {
        let ms = (self.now() - since).num_milliseconds();
        u64::try_from(ms).unwrap_or(0)
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
