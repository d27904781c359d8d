//! Retry metrics tracking
//!
//! Thread-safe counters shared by every [`RetryDriver`](crate::retry::RetryDriver)
//! and batch drain loop of one run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::error::ServiceErrorKind;

/// Thread-safe metrics for tracking service calls and their retries
#[derive(Debug, Clone)]
pub struct RetryMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    calls: AtomicU64,
    retries: AtomicU64,
    throttles: AtomicU64,
    transients: AtomicU64,
    exhausted: AtomicU64,
    backoff_ms: AtomicU64,
}

impl Default for RetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                calls: AtomicU64::new(0),
                retries: AtomicU64::new(0),
                throttles: AtomicU64::new(0),
                transients: AtomicU64::new(0),
                exhausted: AtomicU64::new(0),
                backoff_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Record one attempt of a service call
    pub fn record_call(&self) {
        self.inner.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry caused by `kind`, sleeping `delay` first
    pub fn record_retry(&self, kind: ServiceErrorKind, delay: Duration) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
        match kind {
            ServiceErrorKind::Throttle => {
                self.inner.throttles.fetch_add(1, Ordering::Relaxed);
            }
            ServiceErrorKind::Transient => {
                self.inner.transients.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        self.inner
            .backoff_ms
            .fetch_add(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a retry loop that gave up
    pub fn record_exhausted(&self) {
        self.inner.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.inner.calls.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.inner.retries.load(Ordering::Relaxed)
    }

    pub fn throttles(&self) -> u64 {
        self.inner.throttles.load(Ordering::Relaxed)
    }

    pub fn transients(&self) -> u64 {
        self.inner.transients.load(Ordering::Relaxed)
    }

    pub fn exhausted(&self) -> u64 {
        self.inner.exhausted.load(Ordering::Relaxed)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.inner.backoff_ms.load(Ordering::Relaxed))
    }

    pub fn summary(&self) -> RetrySummary {
        RetrySummary {
            calls: self.calls(),
            retries: self.retries(),
            throttles: self.throttles(),
            transients: self.transients(),
            exhausted: self.exhausted(),
            backoff_ms: self.backoff().as_millis() as u64,
        }
    }
}

/// Point-in-time copy of [`RetryMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub calls: u64,
    pub retries: u64,
    pub throttles: u64,
    pub transients: u64,
    pub exhausted: u64,
    pub backoff_ms: u64,
}

impl RetrySummary {
    /// Counters accumulated since `earlier`
    pub fn since(&self, earlier: &RetrySummary) -> RetrySummary {
        RetrySummary {
            calls: self.calls.saturating_sub(earlier.calls),
            retries: self.retries.saturating_sub(earlier.retries),
            throttles: self.throttles.saturating_sub(earlier.throttles),
            transients: self.transients.saturating_sub(earlier.transients),
            exhausted: self.exhausted.saturating_sub(earlier.exhausted),
            backoff_ms: self.backoff_ms.saturating_sub(earlier.backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = RetryMetrics::new();
        assert_eq!(metrics.calls(), 0);
        assert_eq!(metrics.retries(), 0);
        assert_eq!(metrics.backoff(), Duration::ZERO);
    }

    #[test]
    fn test_retry_counters_by_kind() {
        let metrics = RetryMetrics::new();
        metrics.record_retry(ServiceErrorKind::Throttle, Duration::from_millis(100));
        metrics.record_retry(ServiceErrorKind::Transient, Duration::from_millis(50));
        metrics.record_exhausted();

        assert_eq!(metrics.retries(), 2);
        assert_eq!(metrics.throttles(), 1);
        assert_eq!(metrics.transients(), 1);
        assert_eq!(metrics.exhausted(), 1);
        assert_eq!(metrics.backoff(), Duration::from_millis(150));
    }

    #[test]
    fn test_metrics_are_shared_between_clones() {
        let metrics = RetryMetrics::new();
        let clone = metrics.clone();
        clone.record_call();
        assert_eq!(metrics.calls(), 1);
    }

    #[test]
    fn test_summary_since() {
        let metrics = RetryMetrics::new();
        metrics.record_call();
        let before = metrics.summary();
        metrics.record_call();
        metrics.record_retry(ServiceErrorKind::Throttle, Duration::from_millis(10));

        let delta = metrics.summary().since(&before);
        assert_eq!(delta.calls, 1);
        assert_eq!(delta.retries, 1);
        assert_eq!(delta.backoff_ms, 10);
    }
}
