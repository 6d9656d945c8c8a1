use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ai_client::AiError;
use gamescribe_common::config::RetrySettings;
use search_client::SearchError;

use super::cancel::sleep_or_cancel;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: settings.initial_delay(),
            max_delay: settings.max_delay(),
            multiplier: settings.multiplier,
        }
    }

    /// A single attempt, no waiting.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// `min(initial * multiplier^attempt_index, max_delay)`.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// False when the chain carries a model or search client error that will
/// repeat on every attempt. Anything else is assumed transient.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<AiError>() {
            return e.is_retryable();
        }
        if let Some(e) = cause.downcast_ref::<SearchError>() {
            return e.is_retryable();
        }
    }
    true
}

/// Run `op` until it succeeds or attempts run out.
///
/// A failure observed while `cancel` is signalled is returned immediately,
/// without waiting or retrying. So is a non-retryable client error. Cancellation during a backoff sleep returns
/// the last error as well. After the final attempt the error is annotated
/// with `label` and the attempt count.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    label: Option<&str>,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let label = label.unwrap_or("operation");
    let mut attempt = 0;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(err);
        }

        attempt += 1;
        if !is_retryable(&err) {
            return Err(err.context(format!("{label} failed with a non-retryable error")));
        }
        if attempt >= max_attempts {
            return Err(err.context(format!("{label} failed after {attempt} attempts")));
        }

        let delay = policy.delay_for(attempt - 1);
        warn!(
            label,
            attempt,
            max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Retrying after failure"
        );
        if !sleep_or_cancel(cancel, delay).await {
            return Err(err);
        }
    }
}
