use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use tracing::debug;

use super::types::*;
use crate::error::{AiError, Result};
use crate::util::truncate_chars;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_ERROR_BODY_CHARS: usize = 2_000;

/// `{"type": "error", "error": {"type": "overloaded_error", "message": "..."}}`
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Readable message for a non-2xx body. Falls back to the raw text, capped.
fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => format!("{}: {}", envelope.error.kind, envelope.error.message),
        Err(_) => truncate_chars(body.trim(), MAX_ERROR_BODY_CHARS).to_string(),
    }
}

#[derive(Clone)]
pub(crate) struct ClaudeClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl ClaudeClient {
    pub fn new(api_key: &str, http: reqwest::Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            http,
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| AiError::Config(format!("invalid api key header: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/messages", self.base_url);
        let forced_tool = request.tool_choice.is_some();

        debug!(
            model = %request.model,
            max_tokens = request.max_tokens,
            forced_tool,
            "Claude request"
        );

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let request_id = response
            .headers()
            .get("request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AiError::Api {
                status: status.as_u16(),
                body: api_error_message(&body),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            AiError::Parse(format!("{} response did not decode: {e}", request.model))
        })?;

        debug!(
            model = %request.model,
            request_id = request_id.as_deref().unwrap_or("-"),
            stop_reason = parsed.stop_reason.as_deref().unwrap_or("-"),
            input_tokens = parsed.usage.as_ref().map_or(0, |u| u.input_tokens),
            output_tokens = parsed.usage.as_ref().map_or(0, |u| u.output_tokens),
            "Claude response"
        );
        Ok(parsed)
    }
}
