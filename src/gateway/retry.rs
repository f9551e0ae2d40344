//! Capped exponential backoff for transient gateway failures

use crate::config::RetryConfig;
use crate::errors::SyncResult;
use crate::logger::{self, LogTag};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff calculator with jitter
///
/// Delay for attempt `n` (0-based) is `base * multiplier^n`, capped at
/// `max_delay`, plus up to `jitter * delay` of random extra wait.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
    max_attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(
        base_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: multiplier.max(1.0),
            jitter: 0.0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.multiplier,
            config.max_attempts,
        )
        .with_jitter(config.jitter)
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 0.5);
        self
    }

    /// Total attempts allowed, including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (0 = first retry), without jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(30) as i32);
        let delay_ms = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Delay before retry number `attempt`, jitter included
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }
        let jitter_range = (delay.as_millis() as f64 * self.jitter) as u64;
        if jitter_range == 0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter_range);
        delay + Duration::from_millis(extra)
    }

    /// Delay before retry number `attempt`, raised to a server hint but
    /// never past `max_delay` on account of the hint
    pub fn delay_with_hint(&self, attempt: u32, hint_ms: Option<u64>) -> Duration {
        let delay = self.delay_for(attempt);
        match hint_ms {
            Some(hint) => delay.max(Duration::from_millis(hint).min(self.max_delay)),
            None => delay,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
///
/// Only retryable (transient) errors are retried. A server-provided
/// retry-after hint raises the wait up to the policy's maximum delay.
pub async fn with_retry<T, F, Fut>(
    policy: &ExponentialBackoff,
    label: &str,
    mut op: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts() => {
                let delay = policy.delay_with_hint(attempt, err.retry_after_ms());
                logger::debug(
                    LogTag::Gateway,
                    &format!(
                        "{} failed (attempt {}/{}): {} - retrying in {}ms",
                        label,
                        attempt + 1,
                        policy.max_attempts(),
                        err,
                        delay.as_millis()
                    ),
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    logger::warning(
                        LogTag::Gateway,
                        &format!("{} gave up after {} attempts: {}", label, attempt + 1, err),
                    );
                }
                return Err(err);
            }
        }
    }
}
