//! Exponential backoff for enrichment calls.
//!
//! Any error is treated as transient here: the Overpass mirrors answer with
//! 429, 504, or plain connection resets under load and all of them clear up
//! after a pause.

use std::future::Future;
use std::time::Duration;

use crate::error::ScoutError;

/// Runs `operation` up to `max_attempts` times.
///
/// The wait before attempt `n + 1` is `backoff_base * 2^(n - 1)`, so with a
/// base of 3 s the schedule is 3 s, 6 s, 12 s, ... The last error is returned
/// once attempts are exhausted.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    backoff_base: Duration,
    mut operation: F,
) -> Result<T, ScoutError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScoutError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => return Err(err),
            Err(err) => {
                let delay = backoff_base.saturating_mul(1u32 << (attempt - 1).min(16));
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "enrichment request failed; retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
