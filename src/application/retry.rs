//! Bounded retry of transient commit conflicts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};

/// How often and how patiently a conflicting commit is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry number `retry` (1-based), without jitter.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jittered(&self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        let spread = delay.as_millis() as u64 / 2;
        if spread == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=spread);
        delay + Duration::from_millis(jitter)
    }
}

/// Run `attempt` until it succeeds, fails for good, or attempts run out.
///
/// Only [`Error::TransientConflict`] is retried. Exhaustion yields
/// [`Error::ServerBusy`].
pub async fn run<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    for number in 1..=attempts {
        match attempt().await {
            Err(e) if e.is_retryable() && number < attempts => {
                let delay = policy.jittered(number);
                debug!(
                    operation,
                    attempt = number,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after conflict"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_retryable() => {
                debug!(operation, attempts, error = %e, "retries exhausted");
                return Err(Error::ServerBusy { attempts });
            }
            other => return other,
        }
    }
    Err(Error::ServerBusy { attempts })
}
