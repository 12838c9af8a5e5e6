//! Bounded exponential backoff for transient external failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::duration_ms;
use crate::error::DocVerifyError;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    /// Maximum delay between retries.
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Maximum jitter to add to delays.
    #[serde(with = "duration_ms")]
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let exp = 2_u64.saturating_pow(attempt.saturating_sub(1));
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(exp).min(max_ms);

        let jitter_max = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter_ms = if jitter_max > 0 {
            rand::thread_rng().gen_range(0..=jitter_max)
        } else {
            0
        };
        Duration::from_millis(delay_ms.saturating_add(jitter_ms))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, stage: &'static str, mut op: F) -> Result<T, DocVerifyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DocVerifyError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        stage,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retry: transient failure, backing off: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => {
                    if e.is_retryable() {
                        warn!(stage, attempts = attempt, "Retry: attempts exhausted: {}", e);
                    }
                    return Err(e);
                },
            }
        }
    }
}
