//! Bounded retry with escalating backoff for embedding calls.

use std::future::Future;
use std::time::Duration;

use crate::error::EmbeddingError;

/// How many times to try an embedding call and how long to wait in between.
///
/// The wait after failed attempt `n` (0-based) is
/// `min(base_delay * multiplier^n, max_delay)`. A multiplier of `1.0` gives a
/// fixed delay.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap = self.max_delay.as_millis() as f64;
        let raw = self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        if !raw.is_finite() || raw >= cap {
            return self.max_delay;
        }
        Duration::from_millis(raw.round() as u64)
    }
}

/// Run `f` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
///
/// A rate-limit error carrying a `Retry-After` value waits that long instead
/// of the computed delay, capped at the policy's `max_delay`. Exhaustion is reported as
/// [`EmbeddingError::Exhausted`] wrapping the last retryable error.
pub async fn retry<T, F, Fut>(
    policy: &BackoffPolicy,
    label: &str,
    mut f: F,
) -> Result<T, EmbeddingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EmbeddingError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt + 1 == attempts => {
                return Err(EmbeddingError::Exhausted {
                    attempts,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                let delay = match &e {
                    EmbeddingError::RateLimited {
                        retry_after: Some(wait),
                        ..
                    } => (*wait).min(policy.max_delay),
                    _ => policy.delay_for(attempt),
                };
                tracing::warn!(
                    label,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "embedding call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
