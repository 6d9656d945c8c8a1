use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty response: {0}")]
    EmptyResponse(String),
}

impl AiError {
    /// Bad requests, auth failures and missing config fail the same way on
    /// every attempt. Rate limits, timeouts and server errors do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::Config(_) => false,
            AiError::Api { status, .. } => matches!(status, 408 | 429) || *status >= 500,
            AiError::Network(_) | AiError::Parse(_) | AiError::EmptyResponse(_) => true,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        AiError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> AiError {
        AiError::Api { status, body: String::new() }
    }

    #[test]
    fn client_errors_are_not_retryable() {
        assert!(!api(400).is_retryable());
        assert!(!api(401).is_retryable());
        assert!(!AiError::Config("missing key".into()).is_retryable());
        assert!(api(429).is_retryable());
        assert!(api(529).is_retryable());
        assert!(AiError::Network("reset".into()).is_retryable());
    }
}
