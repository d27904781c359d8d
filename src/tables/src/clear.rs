use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{RetryDriver, ServiceError, SweepError};

use crate::batch::BatchWriter;
use crate::catalog::ResolvedTable;
use crate::export::{SkippedTable, TableFailure};
use crate::item::Item;
use crate::scan::ScanStream;
use crate::service::{TableDescriptor, TableService, WriteRequest};

/// Which models a clear step purges, in purge order, and which it must never touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearPlan {
    pub models: Vec<String>,
    pub protected: Vec<String>,
}

impl ClearPlan {
    pub fn declared(models: Vec<String>) -> Self {
        Self {
            models,
            protected: Vec::new(),
        }
    }

    /// Scraper bookkeeping tables; the cache table is dropped from the list
    /// and protected.
    pub fn scraper(tables: &[String], cache_table: &str) -> Self {
        Self {
            models: tables
                .iter()
                .filter(|t| !t.eq_ignore_ascii_case(cache_table))
                .cloned()
                .collect(),
            protected: vec![cache_table.to_string()],
        }
    }

    pub fn protects(&self, model: &str) -> bool {
        self.protected.iter().any(|p| p.eq_ignore_ascii_case(model))
    }
}

#[derive(Debug, Clone)]
pub struct ClearOptions {
    /// Emit a progress line every N deletions
    pub progress_interval: u64,
    /// Re-count attempts after draining; zero disables verification
    pub verify_attempts: u32,
    pub verify_delay: Duration,
    pub page_limit: Option<i32>,
    pub dry_run: bool,
}

impl Default for ClearOptions {
    fn default() -> Self {
        Self {
            progress_interval: 500,
            verify_attempts: 3,
            verify_delay: Duration::from_secs(2),
            page_limit: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableClear {
    pub model: String,
    pub table: String,
    pub deleted: u64,
    /// Whether a re-count confirmed the table is empty
    pub verified: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ClearReport {
    pub cleared: Vec<TableClear>,
    /// Tables a dry run would clear, with the service's item estimate
    pub planned: Vec<(String, Option<i64>)>,
    pub skipped: Vec<SkippedTable>,
    pub failures: Vec<TableFailure>,
    /// Set when a failure after deletions had begun ended the step
    pub stopped_early: bool,
}

impl ClearReport {
    pub fn deleted(&self) -> u64 {
        self.cleared.iter().map(|c| c.deleted).sum()
    }

    pub fn error(&self) -> Option<SweepError> {
        SweepError::from_failures(
            "tables",
            self.failures.iter().map(|f| &f.error),
            self.cleared.len() + self.failures.len(),
        )
    }
}

/// Deletes every item of a table through key-only scans and batch deletes.
#[derive(Clone)]
pub struct TableClearer {
    service: Arc<dyn TableService>,
    retry: RetryDriver,
    writer: BatchWriter,
    options: ClearOptions,
}

impl TableClearer {
    pub fn new(
        service: Arc<dyn TableService>,
        retry: RetryDriver,
        writer: BatchWriter,
        options: ClearOptions,
    ) -> Self {
        Self {
            service,
            retry,
            writer,
            options,
        }
    }

    /// Clear resolved tables one after another in the given order.
    ///
    /// A failure before anything was deleted is recorded and the next table
    /// is tried; once deletions have happened, a failure ends the step.
    pub async fn clear_tables(&self, plan: &ClearPlan, tables: &[ResolvedTable]) -> ClearReport {
        let mut report = ClearReport::default();
        let mut deleted_total = 0u64;

        for resolved in tables {
            if plan.protects(&resolved.model) {
                tracing::warn!(model = %resolved.model, "Refusing to clear protected table");
                report.skipped.push(SkippedTable {
                    table: resolved.model.clone(),
                    reason: "protected".to_string(),
                });
                continue;
            }

            let Some(table) = &resolved.table else {
                report.skipped.push(SkippedTable {
                    table: resolved.model.clone(),
                    reason: "no table in this environment".to_string(),
                });
                continue;
            };

            if !table.status.is_active() {
                tracing::warn!(table = %table.name, status = ?table.status, "Skipping table that is not active");
                report.skipped.push(SkippedTable {
                    table: table.name.clone(),
                    reason: format!("status {:?}", table.status),
                });
                continue;
            }

            if self.options.dry_run {
                tracing::info!(
                    table = %table.name,
                    estimated_items = ?table.item_count_estimate,
                    "[DRY-RUN] Would delete all items"
                );
                report
                    .planned
                    .push((table.name.clone(), table.item_count_estimate));
                continue;
            }

            let started = Instant::now();
            let mut deleted = 0u64;
            match self.clear_into(table, &mut deleted).await {
                Ok(verified) => {
                    deleted_total += deleted;
                    report.cleared.push(TableClear {
                        model: resolved.model.clone(),
                        table: table.name.clone(),
                        deleted,
                        verified,
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(SweepError::NotFound(error)) => {
                    deleted_total += deleted;
                    tracing::warn!(table = %table.name, deleted, error = %error, "Table disappeared while clearing, skipping");
                    report.skipped.push(SkippedTable {
                        table: table.name.clone(),
                        reason: "not found".to_string(),
                    });
                }
                Err(error) => {
                    deleted_total += deleted;
                    tracing::error!(table = %table.name, deleted, error = %error, "Clearing table failed");
                    let stop = error.is_cancelled() || deleted_total > 0;
                    report.failures.push(TableFailure {
                        table: table.name.clone(),
                        error,
                    });
                    if stop {
                        report.stopped_early = true;
                        break;
                    }
                }
            }
        }

        tracing::info!(
            cleared = report.cleared.len(),
            deleted = report.deleted(),
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            "Clear finished"
        );
        report
    }

    /// Clear one table; returns the number of items deleted.
    pub async fn clear_table(&self, table: &TableDescriptor) -> Result<u64, SweepError> {
        let mut deleted = 0;
        self.clear_into(table, &mut deleted).await?;
        Ok(deleted)
    }

    /// Drain `table` and verify it; `deleted` counts confirmed deletions even on error.
    async fn clear_into(&self, table: &TableDescriptor, deleted: &mut u64) -> Result<bool, SweepError> {
        let key_schema = &table.key_schema;
        let cancel = self.retry.cancel_token().clone();
        let interval = self.options.progress_interval.max(1);

        tracing::info!(table = %table.name, estimated_items = ?table.item_count_estimate, "Clearing table");

        let mut scan = ScanStream::new(self.service.clone(), self.retry.clone(), &table.name)
            .with_projection(key_schema.attributes())
            .with_page_limit(self.options.page_limit);

        while let Some(page) = scan.next_page().await? {
            if cancel.is_cancelled() {
                return Err(SweepError::Cancelled);
            }

            let requests = page
                .iter()
                .map(|item| key_schema.extract_key(item).map(WriteRequest::Delete))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    ServiceError::validation("Scan", format!("{} returned an item without its key", table.name))
                })?;

            let before = *deleted;
            let outcome = match self.writer.apply(&table.name, requests).await {
                Ok(outcome) => outcome,
                Err(failure) => {
                    *deleted += failure.succeeded;
                    return Err(failure.error.into());
                }
            };
            *deleted += outcome.succeeded;

            if !outcome.is_complete() {
                return Err(SweepError::PartialBatch {
                    table: table.name.clone(),
                    unprocessed: outcome.failed.len(),
                    keys: outcome.failed.iter().map(WriteRequest::describe).collect(),
                });
            }

            if *deleted / interval > before / interval {
                tracing::info!(table = %table.name, deleted = *deleted, "Clearing progress");
            }
        }

        let verified = self.verify_empty(table).await?;
        tracing::info!(table = %table.name, deleted = *deleted, verified, "Table cleared");
        Ok(verified)
    }

    /// Re-count until the table reads empty. Counts can lag just-finished deletes.
    async fn verify_empty(&self, table: &TableDescriptor) -> Result<bool, SweepError> {
        let attempts = self.options.verify_attempts;
        if attempts == 0 {
            return Ok(false);
        }

        let mut remaining = 0;
        for attempt in 1..=attempts {
            remaining = self.count_items(&table.name).await?;
            if remaining == 0 {
                return Ok(true);
            }
            tracing::debug!(table = %table.name, remaining, attempt, "Table not empty yet");
            if attempt < attempts {
                tokio::select! {
                    _ = self.retry.cancel_token().cancelled() => return Err(SweepError::Cancelled),
                    _ = tokio::time::sleep(self.options.verify_delay) => {}
                }
            }
        }

        Err(SweepError::Incomplete {
            table: table.name.clone(),
            remaining,
        })
    }

    /// Exact item count, read page by page.
    pub async fn count_items(&self, table: &str) -> Result<u64, ServiceError> {
        let mut total = 0;
        let mut start: Option<Item> = None;
        loop {
            let page = self
                .retry
                .execute("Scan", || self.service.count(table, start.clone()))
                .await?;
            total += page.count;
            match page.last_evaluated_key {
                Some(key) => start = Some(key),
                None => return Ok(total),
            }
        }
    }
}
