use std::sync::Arc;

use async_stream::try_stream;
use common::{RetryDriver, ServiceError};
use futures::Stream;

use crate::item::Item;
use crate::service::{ScanRequest, TableService};

/// Lazily pages through every item of one table.
///
/// A failed page is retried from the same continuation key, so no page is
/// skipped or read twice because of a retry.
pub struct ScanStream {
    service: Arc<dyn TableService>,
    retry: RetryDriver,
    request: ScanRequest,
    exhausted: bool,
    pages: u64,
    items: u64,
}

impl ScanStream {
    pub fn new(service: Arc<dyn TableService>, retry: RetryDriver, table: impl Into<String>) -> Self {
        Self {
            service,
            retry,
            request: ScanRequest::new(table),
            exhausted: false,
            pages: 0,
            items: 0,
        }
    }

    /// Return only these attributes.
    pub fn with_projection(mut self, attributes: Vec<String>) -> Self {
        self.request.projection = Some(attributes);
        self
    }

    pub fn with_page_limit(mut self, limit: Option<i32>) -> Self {
        self.request.limit = limit;
        self
    }

    pub fn table(&self) -> &str {
        &self.request.table
    }

    pub fn cursor(&self) -> Option<&Item> {
        self.request.exclusive_start_key.as_ref()
    }

    pub fn pages_read(&self) -> u64 {
        self.pages
    }

    pub fn items_read(&self) -> u64 {
        self.items
    }

    /// Next non-empty page, or `None` once the table is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Item>>, ServiceError> {
        while !self.exhausted {
            let request = self.request.clone();
            let page = self
                .retry
                .execute("Scan", || self.service.scan(request.clone()))
                .await?;

            self.pages += 1;
            self.items += page.items.len() as u64;

            match page.last_evaluated_key {
                Some(key) => self.request.exclusive_start_key = Some(key),
                None => self.exhausted = true,
            }

            if !page.items.is_empty() {
                return Ok(Some(page.items));
            }
        }
        Ok(None)
    }

    /// Flatten the pages into a stream of items.
    pub fn into_items(self) -> impl Stream<Item = Result<Item, ServiceError>> {
        let mut scan = self;
        try_stream! {
            while let Some(page) = scan.next_page().await? {
                for item in page {
                    yield item;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemValue, KeySchema};
    use crate::memory::{FaultPlan, InMemoryTableService};
    use common::{RetryMetrics, RetryPolicy};
    use futures::{StreamExt, TryStreamExt};
    use std::time::Duration;

    fn seeded(rows: usize) -> Arc<InMemoryTableService> {
        let service = InMemoryTableService::new().with_page_size(7);
        service.create_table("ScrapeURL-abc-dev", KeySchema::new("url"));
        service.insert_items(
            "ScrapeURL-abc-dev",
            (0..rows).map(|i| {
                Item::from([
                    ("url".to_string(), ItemValue::string(format!("https://k/{i:03}"))),
                    ("status".to_string(), ItemValue::string("DONE")),
                ])
            }),
        );
        Arc::new(service)
    }

    fn driver() -> RetryDriver {
        RetryDriver::new(
            RetryPolicy {
                max_attempts: 4,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: 0.0,
            },
            RetryMetrics::new(),
        )
    }

    #[tokio::test]
    async fn test_reads_every_item_once() {
        let service = seeded(30);
        let items: Vec<Item> = ScanStream::new(service, driver(), "ScrapeURL-abc-dev")
            .into_items()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(items.len(), 30);
        let mut urls: Vec<_> = items.iter().map(|i| i["url"].clone()).collect();
        urls.dedup();
        assert_eq!(urls.len(), 30);
    }

    #[tokio::test]
    async fn test_throttled_pages_resume_at_same_cursor() {
        let service = seeded(30);
        service.set_faults(FaultPlan {
            throttle_every: Some(2),
            ..Default::default()
        });

        let retry = driver();
        let metrics = retry.metrics().clone();
        let mut scan = ScanStream::new(service.clone(), retry, "ScrapeURL-abc-dev");
        let mut total = 0;
        while let Some(page) = scan.next_page().await.unwrap() {
            total += page.len();
        }

        assert_eq!(total, 30);
        assert_eq!(scan.items_read(), 30);
        assert!(metrics.throttles() > 0);
    }

    #[tokio::test]
    async fn test_empty_table_yields_nothing() {
        let service = seeded(0);
        let mut scan = ScanStream::new(service, driver(), "ScrapeURL-abc-dev");
        assert!(scan.next_page().await.unwrap().is_none());
        assert!(scan.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_table_fails_without_retry() {
        let service = seeded(0);
        let retry = driver();
        let metrics = retry.metrics().clone();
        let mut items = Box::pin(ScanStream::new(service, retry, "Gone-abc-dev").into_items());

        let err = items.next().await.unwrap().unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(metrics.calls(), 1);
    }
}
