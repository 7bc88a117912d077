//! Retry executor for transient network failures.
//!
//! Backoff behavior lives in the [`RetryPolicy`] settings object; this
//! module only executes it. Non-transient errors (authentication, bad
//! configuration) fail immediately.

use std::future::Future;

use rand::Rng;

use crate::config::RetryPolicy;

/// Runs `op` under the retry policy, re-attempting only while
/// `is_transient` holds for the error.
///
/// Delays double per attempt from `policy.base_delay`, each widened by a
/// random jitter fraction up to `policy.jitter`.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) && attempt + 1 < attempts => {
                let base = policy.delay_for_attempt(attempt);
                let jitter = if policy.jitter > 0.0 {
                    let factor = rand::thread_rng().gen_range(0.0..policy.jitter);
                    base.mul_f64(factor)
                } else {
                    std::time::Duration::ZERO
                };
                let delay = base + jitter;

                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    // Only reachable when the final attempt failed transiently.
    Err(last_err.expect("at least one attempt must have run"))
}
