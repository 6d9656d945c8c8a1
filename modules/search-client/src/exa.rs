// Semantic (neural) search via Exa. Normalizes Exa's camelCase response
// into SearchResponse.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SearchError};
use crate::types::{SearchDepth, SearchHit, SearchOptions, SearchResponse};

const EXA_URL: &str = "https://api.exa.ai/search";

const SNIPPET_CHARS: usize = 500;
const BASIC_TEXT_CHARS: u32 = 4_000;
const ADVANCED_TEXT_CHARS: u32 = 12_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExaSearchRequest<'a> {
    query: &'a str,
    num_results: u32,
    #[serde(rename = "type")]
    search_type: &'static str,
    contents: ExaContents,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExaContents {
    text: ExaTextConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExaTextConfig {
    max_characters: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExaSearchResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
    #[serde(default)]
    cost_dollars: Option<ExaCost>,
}

#[derive(Debug, Deserialize)]
struct ExaResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ExaCost {
    #[serde(default)]
    total: Option<f64>,
}

impl From<ExaSearchResponse> for SearchResponse {
    fn from(resp: ExaSearchResponse) -> Self {
        let results = resp
            .results
            .into_iter()
            .map(|r| {
                let snippet = r.summary.clone().or_else(|| {
                    r.text
                        .as_deref()
                        .map(|t| t.chars().take(SNIPPET_CHARS).collect::<String>())
                });
                SearchHit {
                    title: r.title.unwrap_or_default(),
                    url: r.url,
                    content: snippet,
                    raw_content: r.text,
                    score: r.score,
                }
            })
            .collect();

        SearchResponse {
            // Exa has no synthesized answer; a summary per hit is the closest analogue.
            answer: None,
            results,
            cost_usd: resp.cost_dollars.and_then(|c| c.total),
        }
    }
}

#[derive(Clone)]
pub struct ExaClient {
    api_key: String,
    client: reqwest::Client,
    endpoint: String,
}

impl ExaClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(45))
                .build()
                .unwrap_or_default(),
            endpoint: EXA_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResponse> {
        let max_characters = match options.depth {
            SearchDepth::Basic => BASIC_TEXT_CHARS,
            SearchDepth::Advanced => ADVANCED_TEXT_CHARS,
        };
        let request = ExaSearchRequest {
            query,
            num_results: options.max_results,
            search_type: "neural",
            contents: ExaContents {
                text: ExaTextConfig { max_characters },
                summary: options
                    .include_answer
                    .then(|| serde_json::json!({ "query": query })),
            },
        };

        debug!(query, "exa: searching");

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ExaSearchResponse = resp.json().await?;
        Ok(parsed.into())
    }
}
