use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::{VectorError, VectorResult};

/// Delay curve between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `base × attempt`
    Linear,
    /// `base × multiplier^(attempt - 1)`, capped at `max_delay`
    Exponential { multiplier: f64, max_delay: Duration },
}

/// Retry policy shared by the batch and search paths
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
    /// Per-attempt timeout; an elapsed attempt counts as a transient failure
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Linear backoff, used for chunk writes and backend queries.
    pub fn linear(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff: Backoff::Linear,
            attempt_timeout: None,
        }
    }

    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff: Backoff::Exponential {
                multiplier: 2.0,
                max_delay,
            },
            attempt_timeout: None,
        }
    }

    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self::linear(0, Duration::ZERO)
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential {
                multiplier,
                max_delay,
            } => {
                let exponent = attempt.saturating_sub(1) as i32;
                let secs = self.base_delay.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= max_delay.as_secs_f64() {
                    max_delay
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

/// Defaults:
/// - max_retries: 3
/// - base_delay: 1s, linear
impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3, Duration::from_secs(1))
    }
}

/// Run `attempt_fn` under `policy`.
///
/// Non-transient errors return immediately and unchanged. When every attempt
/// fails with a transient error the last one is wrapped in
/// [`VectorError::RetryExhausted`]. With `max_retries == 0` the single error
/// is returned as-is.
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut attempt_fn: F,
) -> VectorResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = VectorResult<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt_fn(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(VectorError::Timeout {
                    operation,
                    after: limit,
                }),
            },
            None => attempt_fn(attempt).await,
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_transient() {
            return Err(err);
        }

        if attempt >= max_attempts {
            if policy.max_retries == 0 {
                return Err(err);
            }
            error!(operation, attempts = attempt, error = %err, "Retries exhausted");
            return Err(VectorError::RetryExhausted {
                operation,
                attempts: attempt,
                last_error: Box::new(err),
            });
        }

        let delay = policy.delay_for(attempt);
        warn!(
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
