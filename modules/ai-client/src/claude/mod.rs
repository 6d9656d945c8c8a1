mod client;
pub(crate) mod types;

use std::time::Duration;

use tracing::debug;

use crate::error::{AiError, Result};
use crate::pricing::estimate_cost_usd;
use crate::schema::StructuredOutput;

use client::ClaudeClient;
use types::*;

const STRUCTURED_TOOL: &str = "structured_response";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

// =============================================================================
// Public request / response types
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Self {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }
    }
}

/// One completion call. `model: None` uses the client's default model.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub system: String,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: None,
            system: system.into(),
            prompt: prompt.into(),
            temperature: None,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: Usage,
    pub cost_usd: Option<f64>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub value: serde_json::Value,
    pub model: String,
    pub usage: Usage,
    pub cost_usd: Option<f64>,
}

// =============================================================================
// Claude
// =============================================================================

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    pub(crate) model: String,
    http: reqwest::Client,
    base_url: Option<String>,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.into(),
            model: model.into(),
            http,
            base_url: None,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| AiError::Config("ANTHROPIC_API_KEY environment variable not set".into()))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> ClaudeClient {
        let client = ClaudeClient::new(&self.api_key, self.http.clone());
        match self.base_url {
            Some(ref url) => client.with_base_url(url),
            None => client,
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatRequest {
        let model = request.model.as_deref().unwrap_or(&self.model);
        ChatRequest::new(model)
            .system(request.system.clone())
            .message(WireMessage::user(request.prompt.clone()))
            .max_tokens(request.max_tokens)
            .temperature(request.temperature)
    }

    /// Plain text completion.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let wire = self.build_request(request);
        let response = self.client().chat(&wire).await?;

        let usage: Usage = response.usage.unwrap_or_default().into();
        let text = response
            .text()
            .ok_or_else(|| AiError::EmptyResponse("no text block in Claude response".into()))?;

        debug!(
            model = %wire.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Claude completion"
        );

        Ok(Completion {
            text,
            cost_usd: estimate_cost_usd(&wire.model, usage.input_tokens, usage.output_tokens),
            model: wire.model,
            usage,
            stop_reason: response.stop_reason,
        })
    }

    /// Schema-constrained completion via a forced tool call. Returns the raw
    /// tool input so callers behind a trait object can deserialize it.
    pub async fn extract_value(
        &self,
        request: &CompletionRequest,
        schema: serde_json::Value,
    ) -> Result<Extraction> {
        let wire = self.build_request(request).forced_tool(ToolDefinitionWire {
            name: STRUCTURED_TOOL.to_string(),
            description: "Return the requested structured data.".to_string(),
            input_schema: schema,
        });

        let response = self.client().chat(&wire).await?;
        let usage: Usage = response.usage.unwrap_or_default().into();

        let value = response
            .tool_input(STRUCTURED_TOOL)
            .cloned()
            .ok_or_else(|| AiError::EmptyResponse("no structured output in Claude response".into()))?;

        Ok(Extraction {
            value,
            cost_usd: estimate_cost_usd(&wire.model, usage.input_tokens, usage.output_tokens),
            model: wire.model,
            usage,
        })
    }

    /// Typed convenience wrapper over [`Claude::extract_value`].
    pub async fn extract<T: StructuredOutput>(
        &self,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<T> {
        let request = CompletionRequest::new(system_prompt, user_prompt);
        let extraction = self.extract_value(&request, T::tool_schema()).await?;
        serde_json::from_value(extraction.value)
            .map_err(|e| AiError::Parse(format!("failed to deserialize {}: {e}", T::type_name())))
    }
}
