pub mod cancel;
pub mod retry;

pub use cancel::{cancellable, ensure_not_cancelled, sleep_or_cancel};
pub use retry::{retry_with_backoff, RetryPolicy};
