use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Stable, machine-readable error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigError,
    ContextInvalid,
    EditorFailed,
    Timeout,
    Cancelled,
    UpstreamFailed,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ConfigError => "CONFIG_ERROR",
            ErrorKind::ContextInvalid => "CONTEXT_INVALID",
            ErrorKind::EditorFailed => "EDITOR_FAILED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::UpstreamFailed => "UPSTREAM_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<String>),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Marker carried inside `anyhow` chains when work stopped because the run's
/// cancellation token fired.
#[derive(Debug, Clone, Copy, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// True when any error in the chain is [`Cancelled`].
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid generation context: {}", .violations.join("; "))]
    ContextInvalid { violations: Vec<String> },

    #[error("editor plan failed validation after {attempts} attempts: {}", .errors.join("; "))]
    EditorFailed { attempts: u32, errors: Vec<String> },

    #[error("generation timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },

    #[error("generation cancelled")]
    Cancelled,

    #[error("{stage} failed: {source:#}")]
    Upstream {
        stage: String,
        #[source]
        source: anyhow::Error,
    },
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::Config(_) => ErrorKind::ConfigError,
            GenerationError::ContextInvalid { .. } => ErrorKind::ContextInvalid,
            GenerationError::EditorFailed { .. } => ErrorKind::EditorFailed,
            GenerationError::Timeout { .. } => ErrorKind::Timeout,
            GenerationError::Cancelled => ErrorKind::Cancelled,
            GenerationError::Upstream { .. } => ErrorKind::UpstreamFailed,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Wrap a stage failure, mapping cancellation markers to `Cancelled`.
    pub fn from_stage(stage: &str, err: anyhow::Error) -> Self {
        if is_cancellation(&err) {
            return GenerationError::Cancelled;
        }
        match err.downcast::<GenerationError>() {
            Ok(inner) => inner,
            Err(err) => GenerationError::Upstream {
                stage: stage.to_string(),
                source: err,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn codes_are_stable() {
        assert_eq!(GenerationError::Cancelled.code(), "CANCELLED");
        assert_eq!(
            GenerationError::Timeout {
                after: Duration::from_secs(5)
            }
            .code(),
            "TIMEOUT"
        );
        assert_eq!(
            GenerationError::from(ConfigError::MissingCredentials(vec!["X".into()])).code(),
            "CONFIG_ERROR"
        );
    }

    #[test]
    fn context_violations_are_combined_into_one_message() {
        let err = GenerationError::ContextInvalid {
            violations: vec!["game_name must be non-empty".into(), "target_word_count too low".into()],
        };
        assert_eq!(
            err.to_string(),
            "invalid generation context: game_name must be non-empty; target_word_count too low"
        );
    }

    #[test]
    fn cancellation_is_detected_through_context() {
        let err = anyhow::Error::new(Cancelled).context("section 2");
        assert!(is_cancellation(&err));
        assert_eq!(GenerationError::from_stage("specialist", err).kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn nested_generation_errors_are_unwrapped() {
        let inner: anyhow::Result<()> = Err(GenerationError::EditorFailed {
            attempts: 3,
            errors: vec!["x".into()],
        }
        .into());
        let err = inner.context("editor").unwrap_err();
        assert_eq!(GenerationError::from_stage("editor", err).kind(), ErrorKind::EditorFailed);
    }

    #[test]
    fn other_failures_are_upstream() {
        let err = anyhow::anyhow!("provider returned 503");
        let wrapped = GenerationError::from_stage("reviewer", err);
        assert_eq!(wrapped.kind(), ErrorKind::UpstreamFailed);
        assert!(wrapped.to_string().starts_with("reviewer failed"));
    }
}
