use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{CancelToken, RetryDriver, RetryPolicy, ServiceError, ServiceErrorKind};
use futures::StreamExt;
use thiserror::Error;

use crate::service::{TableService, WriteRequest};

/// Largest batch the table service accepts.
pub const MAX_BATCH_SIZE: usize = 25;

/// What happened to a set of writes.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: u64,
    /// Requests still unprocessed once the drain budget ran out, in submission order
    pub failed: Vec<WriteRequest>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn merge(&mut self, other: BatchOutcome) {
        self.succeeded += other.succeeded;
        self.failed.extend(other.failed);
    }
}

/// A write call failed; `succeeded` writes had already been applied.
#[derive(Debug, Error)]
#[error("{error} ({succeeded} writes applied before the failure)")]
pub struct BatchFailure {
    pub succeeded: u64,
    #[source]
    pub error: ServiceError,
}

/// Submits writes in chunks of at most [`MAX_BATCH_SIZE`] and drains the
/// unprocessed remainder of each chunk under the throttle policy.
#[derive(Clone)]
pub struct BatchWriter {
    service: Arc<dyn TableService>,
    retry: RetryDriver,
    drain: RetryPolicy,
    chunk_concurrency: usize,
}

impl BatchWriter {
    pub fn new(service: Arc<dyn TableService>, retry: RetryDriver, drain: RetryPolicy) -> Self {
        Self {
            service,
            retry,
            drain,
            chunk_concurrency: 1,
        }
    }

    /// Allow up to `limit` chunks of one call in flight at once.
    pub fn with_chunk_concurrency(mut self, limit: usize) -> Self {
        self.chunk_concurrency = limit.max(1);
        self
    }

    fn cancel(&self) -> &CancelToken {
        self.retry.cancel_token()
    }

    /// Apply `requests` to `table`. Every chunk is fully drained or given up
    /// on before this returns.
    ///
    /// After a failed call no further chunk is started, chunks already in
    /// flight run to completion, and the error carries every write applied.
    pub async fn apply(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> Result<BatchOutcome, BatchFailure> {
        let chunks: Vec<Vec<WriteRequest>> = requests
            .chunks(MAX_BATCH_SIZE)
            .map(<[WriteRequest]>::to_vec)
            .collect();

        let halted = AtomicBool::new(false);
        let mut results = futures::stream::iter(chunks)
            .map(|chunk| {
                let halted = &halted;
                async move {
                    if halted.load(Ordering::Acquire) {
                        return None;
                    }
                    Some(self.drain_chunk(table, chunk).await)
                }
            })
            .buffered(self.chunk_concurrency);

        let mut outcome = BatchOutcome::default();
        let mut first_error = None;
        while let Some(result) = results.next().await {
            match result {
                Some(Ok(chunk)) => outcome.merge(chunk),
                Some(Err(failure)) => {
                    halted.store(true, Ordering::Release);
                    outcome.succeeded += failure.succeeded;
                    first_error.get_or_insert(failure.error);
                }
                None => {}
            }
        }

        match first_error {
            Some(error) => Err(BatchFailure {
                succeeded: outcome.succeeded,
                error,
            }),
            None => Ok(outcome),
        }
    }

    async fn drain_chunk(
        &self,
        table: &str,
        chunk: Vec<WriteRequest>,
    ) -> Result<BatchOutcome, BatchFailure> {
        let mut pending = chunk;
        let mut outcome = BatchOutcome::default();
        let max_attempts = self.drain.max_attempts.max(1);

        for attempt in 0..max_attempts {
            let submitted = pending.clone();
            let unprocessed = match self
                .retry
                .execute("BatchWriteItem", || {
                    self.service.batch_write(table, submitted.clone())
                })
                .await
            {
                Ok(unprocessed) => unprocessed,
                Err(error) => {
                    return Err(BatchFailure {
                        succeeded: outcome.succeeded,
                        error,
                    });
                }
            };

            outcome.succeeded += (pending.len() - unprocessed.len().min(pending.len())) as u64;
            if unprocessed.is_empty() {
                return Ok(outcome);
            }

            // Resubmit in the original order, whatever order the service reported
            pending.retain(|request| unprocessed.contains(request));

            if attempt + 1 >= max_attempts {
                break;
            }

            let delay = self.drain.jittered_delay(attempt);
            tracing::debug!(
                table,
                unprocessed = pending.len(),
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Resubmitting unprocessed writes"
            );
            self.retry
                .metrics()
                .record_retry(ServiceErrorKind::Throttle, delay);

            tokio::select! {
                _ = self.cancel().cancelled() => {
                    return Err(BatchFailure {
                        succeeded: outcome.succeeded,
                        error: ServiceError::cancelled("BatchWriteItem"),
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.retry.metrics().record_exhausted();
        tracing::warn!(
            table,
            unprocessed = pending.len(),
            attempts = max_attempts,
            "Unprocessed writes did not drain"
        );
        outcome.failed = pending;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, ItemValue, KeySchema};
    use crate::memory::{FaultPlan, InMemoryTableService};
    use common::RetryMetrics;
    use std::time::Duration;

    const TABLE: &str = "PlayerEntry-abc-dev";

    fn key(i: usize) -> Item {
        Item::from([("id".to_string(), ItemValue::string(format!("{i:05}")))])
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: 0.0,
        }
    }

    fn setup(rows: usize) -> (Arc<InMemoryTableService>, RetryMetrics) {
        let service = InMemoryTableService::new();
        service.create_table(TABLE, KeySchema::new("id"));
        service.insert_items(TABLE, (0..rows).map(key));
        (Arc::new(service), RetryMetrics::new())
    }

    #[tokio::test]
    async fn test_chunks_never_exceed_batch_size() {
        let (service, metrics) = setup(60);
        let writer = BatchWriter::new(
            service.clone(),
            RetryDriver::new(fast(3), metrics),
            fast(3),
        )
        .with_chunk_concurrency(2);

        let deletes = (0..60).map(|i| WriteRequest::Delete(key(i))).collect();
        let outcome = writer.apply(TABLE, deletes).await.unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.succeeded, 60);
        assert_eq!(service.write_calls(), 3);
        assert_eq!(service.item_count(TABLE), 0);
    }

    #[tokio::test]
    async fn test_unprocessed_writes_are_drained() {
        let (service, metrics) = setup(100);
        service.set_faults(FaultPlan {
            unprocessed_ratio: 0.4,
            seed: 7,
            ..Default::default()
        });
        let writer = BatchWriter::new(
            service.clone(),
            RetryDriver::new(fast(3), metrics.clone()),
            fast(40),
        );

        let deletes = (0..100).map(|i| WriteRequest::Delete(key(i))).collect();
        let outcome = writer.apply(TABLE, deletes).await.unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.succeeded, 100);
        assert_eq!(service.item_count(TABLE), 0);
        assert!(metrics.throttles() > 0);
    }

    #[tokio::test]
    async fn test_undrained_writes_are_reported_in_order() {
        let (service, metrics) = setup(30);
        service.set_faults(FaultPlan {
            unprocessed_ratio: 1.0,
            ..Default::default()
        });
        let writer = BatchWriter::new(
            service.clone(),
            RetryDriver::new(fast(3), metrics.clone()),
            fast(3),
        );

        let deletes: Vec<WriteRequest> = (0..30).map(|i| WriteRequest::Delete(key(i))).collect();
        let outcome = writer.apply(TABLE, deletes.clone()).await.unwrap();

        assert_eq!(outcome.succeeded, 0);
        assert_eq!(outcome.failed, deletes);
        assert_eq!(service.write_calls(), 6);
        assert_eq!(metrics.exhausted(), 2);
    }

    #[tokio::test]
    async fn test_access_denied_is_not_retried() {
        let (service, metrics) = setup(5);
        service.set_faults(FaultPlan {
            denied_writes: [TABLE.to_string()].into(),
            ..Default::default()
        });
        let writer = BatchWriter::new(service.clone(), RetryDriver::new(fast(5), metrics), fast(5));

        let deletes = (0..5).map(|i| WriteRequest::Delete(key(i))).collect();
        let err = writer.apply(TABLE, deletes).await.unwrap_err();

        assert_eq!(err.error.kind, ServiceErrorKind::AccessDenied);
        assert_eq!(err.succeeded, 0);
        assert_eq!(service.write_calls(), 1);
        assert_eq!(service.item_count(TABLE), 5);
    }

    #[tokio::test]
    async fn test_failure_reports_writes_already_applied() {
        let (service, metrics) = setup(60);
        // Call 1 is the first chunk, call 2 the second
        service.set_faults(FaultPlan {
            throttle_every: Some(2),
            ..Default::default()
        });
        let writer = BatchWriter::new(service.clone(), RetryDriver::new(fast(1), metrics), fast(3));

        let deletes = (0..60).map(|i| WriteRequest::Delete(key(i))).collect();
        let err = writer.apply(TABLE, deletes).await.unwrap_err();

        assert_eq!(err.error.kind, ServiceErrorKind::Throttle);
        assert_eq!(err.succeeded, 25);
        assert_eq!(service.item_count(TABLE), 35);
        // The third chunk is never submitted
        assert_eq!(service.write_calls(), 2);
    }
}
