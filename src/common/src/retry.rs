//! Bounded exponential backoff with jitter around every service call.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::config::ConfigError;
use crate::error::{ErrorClass, ServiceError};
use crate::metrics::RetryMetrics;

/// How often and how patiently a call is retried.
///
/// Attempt `i` (zero based) that fails with a retryable error sleeps
/// `min(max_delay, base_delay * 2^i) * (1 + u * jitter)` with `u` drawn
/// uniformly from `[-1, 1]`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter fraction in `[0, 1]`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryPolicy {
    /// Policy for ordinary reads, listings and deletes
    pub fn standard() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: 0.2,
        }
    }

    /// Policy for draining unprocessed batch requests: longer base, higher ceiling
    pub fn throttle() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(20),
            jitter: 0.3,
        }
    }

    pub fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::NotPositive { field });
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::Load(format!(
                "{field}: base_delay {:?} exceeds max_delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::OutOfRange {
                field,
                value: self.jitter,
            });
        }
        Ok(())
    }

    /// Backoff before retrying after failed attempt `attempt`, for a jitter
    /// sample `unit` in `[-1, 1]`.
    pub fn delay_for(&self, attempt: u32, unit: f64) -> Duration {
        let factor = (1.0 + unit.clamp(-1.0, 1.0) * self.jitter).max(0.0);
        scale(self.capped_delay(attempt), factor)
    }

    /// Backoff for `attempt` with a fresh jitter sample
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_for(attempt, unit)
    }

    fn capped_delay(&self, attempt: u32) -> Duration {
        let exp = 2u32.saturating_pow(attempt.min(30));
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }

    /// Upper bound of the total time slept by one exhausted retry loop.
    pub fn max_total_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| scale(self.capped_delay(attempt), 1.0 + self.jitter))
            .sum()
    }
}

fn scale(delay: Duration, factor: f64) -> Duration {
    Duration::from_nanos((delay.as_nanos() as f64 * factor).round() as u64)
}

/// Runs service calls under a [`RetryPolicy`].
#[derive(Clone, Debug)]
pub struct RetryDriver {
    policy: RetryPolicy,
    call_timeout: Option<Duration>,
    metrics: RetryMetrics,
    cancel: CancelToken,
}

impl RetryDriver {
    pub fn new(policy: RetryPolicy, metrics: RetryMetrics) -> Self {
        Self {
            policy,
            call_timeout: None,
            metrics,
            cancel: CancelToken::new(),
        }
    }

    /// Bound every single attempt by `timeout`; an elapsed attempt counts as transient.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> &RetryMetrics {
        &self.metrics
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run `op` until it succeeds, fails fatally, or the attempt budget is spent.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 0..max_attempts {
            if self.cancel.is_cancelled() {
                return Err(ServiceError::cancelled(operation));
            }

            self.metrics.record_call();
            let outcome = match self.call_timeout {
                Some(limit) => tokio::select! {
                    _ = self.cancel.cancelled() => return Err(ServiceError::cancelled(operation)),
                    res = tokio::time::timeout(limit, op()) => res.unwrap_or_else(|_| {
                        Err(ServiceError::transient(
                            operation,
                            format!("no response within {limit:?}"),
                        ))
                    }),
                },
                None => tokio::select! {
                    _ = self.cancel.cancelled() => return Err(ServiceError::cancelled(operation)),
                    res = op() => res,
                },
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(operation, attempts = attempt + 1, "Call succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.class() == ErrorClass::Fatal {
                return Err(err);
            }

            if attempt + 1 >= max_attempts {
                self.metrics.record_exhausted();
                tracing::warn!(
                    operation,
                    attempts = max_attempts,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Err(err);
            }

            let delay = self.policy.jittered_delay(attempt);
            self.metrics.record_retry(err.kind, delay);
            tracing::debug!(
                operation,
                attempt = attempt + 1,
                max_attempts,
                kind = %err.kind,
                delay_ms = delay.as_millis() as u64,
                "Retrying after backoff"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ServiceError::cancelled(operation)),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Err(ServiceError::transient(operation, "no attempts were made"))
    }
}
