//! Bounded retry for whole-batch transactions.

use crate::error::{ErrorKind, Result};
use std::num::NonZeroU32;

/// Run `attempt` until it succeeds, fails with a non-retryable error, or has
/// been tried `max_attempts` times.
///
/// Each call receives its 1-based attempt number. Only
/// [`ErrorKind::ConstraintRace`] is retried; once attempts run out the last
/// race is wrapped in [`ErrorKind::ErrorAdding`]. There is no backoff.
pub(crate) async fn with_retries<T, F, Fut>(max_attempts: NonZeroU32, mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.get();
    let mut current = 1;
    loop {
        match attempt(current).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && current < max_attempts => {
                tracing::warn!(attempt = current, max_attempts, "Lost insert race to a concurrent writer; retrying batch");
                current += 1;
            },
            Err(err) if err.is_retryable() => {
                tracing::error!(max_attempts, "Lost every insert race; giving up on batch");
                return Err(err.raise(ErrorKind::ErrorAdding(max_attempts)));
            },
            Err(err) => return Err(err),
        }
    }
}
