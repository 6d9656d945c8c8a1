use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use gamescribe_common::Cancelled;

/// Fail with [`Cancelled`] if the token has already fired.
pub fn ensure_not_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(Cancelled.into());
    }
    Ok(())
}

/// Race `fut` against the token. Dropping the losing future aborts the
/// underlying HTTP request.
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Cancelled.into()),
        result = fut => result,
    }
}

/// Sleep unless cancelled first. Returns `false` when the token fired.
pub async fn sleep_or_cancel(token: Option<&CancellationToken>, duration: Duration) -> bool {
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        },
        None => {
            tokio::time::sleep(duration).await;
            true
        }
    }
}
