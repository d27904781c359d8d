use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use common::backup::{BackupLayout, write_durable};
use common::{RetryDriver, SweepError};
use futures::StreamExt;

use crate::projector::CsvProjector;
use crate::scan::ScanStream;
use crate::service::{TableDescriptor, TableService};

#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Tables scanned in parallel
    pub workers: usize,
    pub null_sentinel: Option<String>,
    pub page_limit: Option<i32>,
    pub dry_run: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            null_sentinel: None,
            page_limit: None,
            dry_run: false,
        }
    }
}

/// A table written to its snapshot file, or found empty.
#[derive(Debug, Clone)]
pub struct TableExport {
    pub table: String,
    pub rows: u64,
    /// Header plus one line per row; zero when no file was written
    pub lines: u64,
    pub bytes: u64,
    pub path: Option<PathBuf>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SkippedTable {
    pub table: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct TableFailure {
    pub table: String,
    pub error: SweepError,
}

/// Outcome of exporting a set of tables.
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub exported: Vec<TableExport>,
    /// Tables a dry run would export, with the service's item estimate
    pub planned: Vec<(String, Option<i64>)>,
    pub skipped: Vec<SkippedTable>,
    pub failures: Vec<TableFailure>,
}

impl ExportReport {
    pub fn rows(&self) -> u64 {
        self.exported.iter().map(|e| e.rows).sum()
    }

    pub fn files_written(&self) -> usize {
        self.exported.iter().filter(|e| e.path.is_some()).count()
    }

    /// The error this export ends with, if any table failed.
    pub fn error(&self) -> Option<SweepError> {
        SweepError::from_failures(
            "tables",
            self.failures.iter().map(|f| &f.error),
            self.exported.len() + self.failures.len(),
        )
    }
}

/// Snapshots tables to one CSV file each.
#[derive(Clone)]
pub struct TableExporter {
    service: Arc<dyn TableService>,
    retry: RetryDriver,
    layout: BackupLayout,
    options: ExportOptions,
}

impl TableExporter {
    pub fn new(
        service: Arc<dyn TableService>,
        retry: RetryDriver,
        layout: BackupLayout,
        options: ExportOptions,
    ) -> Self {
        Self {
            service,
            retry,
            layout,
            options,
        }
    }

    /// Export every table, a bounded number at a time. A failing table does
    /// not stop the others.
    pub async fn export_all(&self, tables: Vec<TableDescriptor>) -> ExportReport {
        let mut report = ExportReport::default();

        let mut active = Vec::with_capacity(tables.len());
        for table in tables {
            if table.status.is_active() {
                active.push(table);
            } else {
                tracing::warn!(table = %table.name, status = ?table.status, "Skipping table that is not active");
                report.skipped.push(SkippedTable {
                    reason: format!("status {:?}", table.status),
                    table: table.name,
                });
            }
        }

        if self.options.dry_run {
            for table in active {
                tracing::info!(
                    table = %table.name,
                    estimated_items = ?table.item_count_estimate,
                    path = %self.layout.table_csv_path(&table.name).display(),
                    "[DRY-RUN] Would export table"
                );
                report.planned.push((table.name, table.item_count_estimate));
            }
            return report;
        }

        let results: Vec<(String, Result<TableExport, SweepError>)> = futures::stream::iter(active)
            .map(|table| async move {
                let result = self.export_table(&table).await;
                (table.name, result)
            })
            .buffer_unordered(self.options.workers.max(1))
            .collect()
            .await;

        for (table, result) in results {
            match result {
                Ok(export) => report.exported.push(export),
                Err(SweepError::NotFound(error)) => {
                    tracing::warn!(table = %table, error = %error, "Table disappeared before export, skipping");
                    report.skipped.push(SkippedTable {
                        table,
                        reason: "not found".to_string(),
                    });
                }
                Err(error) => {
                    tracing::error!(table = %table, error = %error, "Table export failed");
                    report.failures.push(TableFailure { table, error });
                }
            }
        }

        report.exported.sort_by(|a, b| a.table.cmp(&b.table));
        report.failures.sort_by(|a, b| a.table.cmp(&b.table));
        report.skipped.sort_by(|a, b| a.table.cmp(&b.table));

        tracing::info!(
            exported = report.exported.len(),
            files = report.files_written(),
            rows = report.rows(),
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            "Export finished"
        );
        report
    }

    /// Scan one table and write its snapshot. Empty tables produce no file.
    pub async fn export_table(&self, table: &TableDescriptor) -> Result<TableExport, SweepError> {
        let started = Instant::now();
        let cancel = self.retry.cancel_token().clone();

        let mut scan = ScanStream::new(self.service.clone(), self.retry.clone(), &table.name)
            .with_page_limit(self.options.page_limit);
        let mut projector = CsvProjector::new(self.options.null_sentinel.clone())
            .with_leading_columns(table.key_schema.attributes());

        while let Some(page) = scan.next_page().await? {
            projector.extend(&page);
            if cancel.is_cancelled() {
                return Err(SweepError::Cancelled);
            }
        }

        if projector.row_count() == 0 {
            tracing::info!(table = %table.name, "Table is empty, no snapshot written");
            return Ok(TableExport {
                table: table.name.clone(),
                rows: 0,
                lines: 0,
                bytes: 0,
                path: None,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        let path = self.layout.table_csv_path(&table.name);
        let rows = projector.row_count() as u64;
        let columns = projector.columns().len();
        let (buffer, lines) = projector
            .to_bytes()
            .map_err(|e| SweepError::io(&path, e.into()))?;
        let bytes = write_durable(&path, &buffer)
            .await
            .map_err(|e| SweepError::io(&path, e))?;

        tracing::info!(
            table = %table.name,
            rows,
            lines,
            columns,
            bytes,
            path = %path.display(),
            "Exported table"
        );

        Ok(TableExport {
            table: table.name.clone(),
            rows,
            lines,
            bytes,
            path: Some(path),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, ItemValue, KeySchema};
    use crate::memory::{FaultPlan, InMemoryTableService};
    use crate::service::TableStatus;
    use common::backup::RunStamp;
    use common::config::BackupConfig;
    use common::{RetryMetrics, RetryPolicy};
    use std::time::Duration;

    fn layout(root: &std::path::Path) -> BackupLayout {
        let config = BackupConfig {
            root: Some(root.to_path_buf()),
            ..Default::default()
        };
        BackupLayout::new(&config, RunStamp::now())
    }

    fn driver() -> RetryDriver {
        RetryDriver::new(
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: 0.0,
            },
            RetryMetrics::new(),
        )
    }

    fn descriptor(name: &str) -> TableDescriptor {
        TableDescriptor {
            name: name.to_string(),
            key_schema: KeySchema::new("id"),
            status: TableStatus::Active,
            item_count_estimate: None,
        }
    }

    fn venue(i: usize) -> Item {
        Item::from([
            ("id".to_string(), ItemValue::string(format!("v{i}"))),
            ("name".to_string(), ItemValue::string(format!("Venue {i}"))),
        ])
    }

    fn service() -> Arc<InMemoryTableService> {
        let service = InMemoryTableService::new().with_page_size(2);
        service.create_table("Venue-abc-dev", KeySchema::new("id"));
        service.create_table("Game-abc-dev", KeySchema::new("id"));
        service.insert_items("Venue-abc-dev", (0..5).map(venue));
        Arc::new(service)
    }

    #[tokio::test]
    async fn test_export_writes_header_and_rows() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let exporter = TableExporter::new(
            service(),
            driver(),
            layout(temp_dir.path()),
            ExportOptions::default(),
        );

        let report = exporter
            .export_all(vec![descriptor("Venue-abc-dev"), descriptor("Game-abc-dev")])
            .await;

        assert!(report.failures.is_empty());
        assert_eq!(report.files_written(), 1);

        let venue = report.exported.iter().find(|e| e.table == "Venue-abc-dev").unwrap();
        assert_eq!(venue.rows, 5);
        assert_eq!(venue.lines, 6);
        let content = std::fs::read_to_string(venue.path.as_ref().unwrap()).unwrap();
        assert_eq!(content.lines().count(), 6);
        assert_eq!(content.lines().next(), Some("id,name"));

        let game = report.exported.iter().find(|e| e.table == "Game-abc-dev").unwrap();
        assert!(game.path.is_none());
    }

    #[tokio::test]
    async fn test_failed_table_does_not_stop_others() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let service = service();
        service.insert_items("Game-abc-dev", (0..3).map(venue));
        service.set_faults(FaultPlan {
            denied_tables: ["Game-abc-dev".to_string()].into(),
            ..Default::default()
        });
        let exporter = TableExporter::new(
            service,
            driver(),
            layout(temp_dir.path()),
            ExportOptions::default(),
        );

        let report = exporter
            .export_all(vec![descriptor("Venue-abc-dev"), descriptor("Game-abc-dev")])
            .await;

        assert_eq!(report.exported.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error, SweepError::AccessDenied(_)));
        assert!(matches!(report.error(), Some(SweepError::Partial { failed: 1, total: 2, .. })));
        assert!(!exporter.layout.table_csv_path("Game-abc-dev").exists());
    }

    #[tokio::test]
    async fn test_vanished_table_is_skipped() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let exporter = TableExporter::new(
            service(),
            driver(),
            layout(temp_dir.path()),
            ExportOptions::default(),
        );

        let report = exporter
            .export_all(vec![descriptor("Venue-abc-dev"), descriptor("Gone-abc-dev")])
            .await;

        assert!(report.failures.is_empty());
        assert!(report.error().is_none());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].table, "Gone-abc-dev");
        assert_eq!(report.exported.len(), 1);
        assert!(!exporter.layout.table_csv_path("Gone-abc-dev").exists());
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let service = service();
        let exporter = TableExporter::new(
            service.clone(),
            driver(),
            layout(temp_dir.path()),
            ExportOptions {
                dry_run: true,
                ..Default::default()
            },
        );

        let report = exporter.export_all(vec![descriptor("Venue-abc-dev")]).await;

        assert_eq!(report.planned.len(), 1);
        assert!(report.exported.is_empty());
        assert_eq!(service.scan_calls(), 0);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_inactive_tables_are_skipped() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let exporter = TableExporter::new(
            service(),
            driver(),
            layout(temp_dir.path()),
            ExportOptions::default(),
        );
        let mut table = descriptor("Venue-abc-dev");
        table.status = TableStatus::Deleting;

        let report = exporter.export_all(vec![table]).await;
        assert_eq!(report.skipped.len(), 1);
        assert!(report.exported.is_empty());
    }
}
