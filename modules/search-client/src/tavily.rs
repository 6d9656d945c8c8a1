// Keyword search via Tavily. Normalizes Tavily's response into SearchResponse.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SearchError};
use crate::types::{SearchHit, SearchOptions, SearchResponse};

const TAVILY_URL: &str = "https://api.tavily.com/search";

/// List price per Tavily API credit.
const USD_PER_CREDIT: f64 = 0.008;

#[derive(Debug, Serialize)]
struct TavilySearchRequest<'a> {
    query: &'a str,
    max_results: u32,
    search_depth: &'static str,
    include_answer: bool,
    include_raw_content: bool,
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
    #[serde(default)]
    usage: Option<TavilyUsage>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    raw_content: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TavilyUsage {
    #[serde(default)]
    credits: Option<f64>,
}

impl From<TavilySearchResponse> for SearchResponse {
    fn from(resp: TavilySearchResponse) -> Self {
        SearchResponse {
            answer: resp.answer.filter(|a| !a.trim().is_empty()),
            results: resp
                .results
                .into_iter()
                .map(|r| SearchHit {
                    title: r.title,
                    url: r.url,
                    content: r.content,
                    raw_content: r.raw_content,
                    score: r.score,
                })
                .collect(),
            cost_usd: resp
                .usage
                .and_then(|u| u.credits)
                .map(|credits| credits * USD_PER_CREDIT),
        }
    }
}

#[derive(Clone)]
pub struct TavilyClient {
    api_key: String,
    client: reqwest::Client,
    endpoint: String,
}

impl TavilyClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(45))
                .build()
                .unwrap_or_default(),
            endpoint: TAVILY_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResponse> {
        let request = TavilySearchRequest {
            query,
            max_results: options.max_results,
            search_depth: options.depth.as_str(),
            include_answer: options.include_answer,
            include_raw_content: true,
            include_usage: true,
        };

        debug!(query, depth = options.depth.as_str(), "tavily: searching");

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
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

        let parsed: TavilySearchResponse = resp.json().await?;
        Ok(parsed.into())
    }
}
