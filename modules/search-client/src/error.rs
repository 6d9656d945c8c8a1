use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl SearchError {
    /// 4xx responses other than timeouts and rate limits are not worth repeating.
    pub fn is_retryable(&self) -> bool {
        match self {
            SearchError::Api { status, .. } => matches!(status, 408 | 429) || *status >= 500,
            SearchError::Network(_) | SearchError::Parse(_) => true,
        }
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SearchError::Parse(err.to_string())
        } else {
            SearchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Parse(err.to_string())
    }
}
