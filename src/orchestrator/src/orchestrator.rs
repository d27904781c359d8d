//! Runs the lifecycle steps against one environment.
//!
//! Every step lists what it is about to touch, prints that plan, waits for
//! the confirmation gate and then hands the work to the table or log engine.
//! All steps of one orchestrator share the run stamp, so a full run writes
//! `dbbackup_<stamp>` and `logbackup_<stamp>` side by side.

use std::io;
use std::path::Path;
use std::time::Instant;

use common::backup::{BackupLayout, RunStamp};
use common::storage::BackupMirror;
use common::{CancelToken, Configuration, RetryDriver, RetryMetrics, SweepError};
use logs::{ArchiveOptions, GroupFilter, LogArchiver, LogCatalog};
use tables::{
    BatchWriter, ClearOptions, ClearPlan, ExportOptions, TableCatalog, TableClearer, TableDescriptor,
    TableExporter, TableFilter,
};

use crate::clients::Services;
use crate::confirm::Confirmer;
use crate::plan::{PlanEntry, StepKind, StepPlan};
use crate::report::{RunReport, StepReport};

pub struct Orchestrator {
    config: Configuration,
    services: Services,
    confirmer: Confirmer,
    dry_run: bool,
    layout: BackupLayout,
    metrics: RetryMetrics,
    cancel: CancelToken,
    print_plans: bool,
}

impl Orchestrator {
    /// Validates `config` before anything touches a service or the disk.
    pub fn new(
        config: Configuration,
        services: Services,
        confirmer: Confirmer,
        dry_run: bool,
    ) -> Result<Self, SweepError> {
        config.validate()?;
        let layout = BackupLayout::new(&config.backup, RunStamp::now());
        Ok(Self {
            config,
            services,
            confirmer,
            dry_run,
            layout,
            metrics: RetryMetrics::new(),
            cancel: CancelToken::new(),
            print_plans: true,
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_stamp(mut self, stamp: RunStamp) -> Self {
        self.layout = BackupLayout::new(&self.config.backup, stamp);
        self
    }

    /// Keep pre-flight plans off standard error; they still land in the report.
    pub fn quiet_plans(mut self) -> Self {
        self.print_plans = false;
        self
    }

    pub fn layout(&self) -> &BackupLayout {
        &self.layout
    }

    pub fn metrics(&self) -> &RetryMetrics {
        &self.metrics
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub async fn export_all(&self) -> RunReport {
        self.run(&[StepKind::Export]).await
    }

    pub async fn clear_declared(&self) -> RunReport {
        self.run(&[StepKind::ClearDeclared]).await
    }

    pub async fn clear_scraper_meta(&self) -> RunReport {
        self.run(&[StepKind::ClearScraperMeta]).await
    }

    pub async fn archive_and_delete_logs(&self) -> RunReport {
        self.run(&[StepKind::ArchiveLogs]).await
    }

    /// Export, both clears and the log archive, in that order. The first step
    /// that does not succeed ends the run.
    pub async fn run_all(&self) -> RunReport {
        self.run(&StepKind::ALL).await
    }

    async fn run(&self, steps: &[StepKind]) -> RunReport {
        let mut report = RunReport::new(
            &self.config.environment.name,
            self.layout.stamp().started_at(),
            self.dry_run,
        );
        tracing::info!(
            run_id = %report.run_id,
            environment = %self.config.environment.name,
            dry_run = self.dry_run,
            steps = steps.len(),
            "Run started"
        );

        for &step in steps {
            let step_report = self.run_step(step).await;
            let ok = step_report.is_ok();
            report.steps.push(step_report);
            if !ok {
                tracing::error!(step = %step, "Step did not succeed, stopping run");
                break;
            }
        }

        report.finish(self.metrics.summary());
        self.persist_report(&report).await;
        report
    }

    async fn run_step(&self, step: StepKind) -> StepReport {
        let started = Instant::now();
        let before = self.metrics.summary();

        if self.cancel.is_cancelled() {
            return StepReport::new(step, self.dry_run).failed_with(SweepError::Cancelled);
        }

        let work = self.execute(step);
        tokio::pin!(work);
        let mut report = match self.config.timeouts.operation_timeout {
            None => work.await,
            Some(limit) => tokio::select! {
                report = &mut work => report,
                _ = tokio::time::sleep(limit) => {
                    tracing::warn!(step = %step, ?limit, "Step deadline reached, cancelling");
                    self.cancel.cancel();
                    let mut report = work.await;
                    report.fail(SweepError::Timeout(limit));
                    report
                }
            },
        };

        report.retries = self.metrics.summary().since(&before);
        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            step = %step,
            status = %report.status,
            items = report.items,
            retries = report.retries.retries,
            duration_ms = report.duration_ms,
            "Step finished"
        );
        report
    }

    async fn execute(&self, step: StepKind) -> StepReport {
        match step {
            StepKind::Export => self.export_step().await,
            StepKind::ClearDeclared => {
                let plan = ClearPlan::declared(self.config.clear.declared_tables.clone());
                self.clear_step(step, plan).await
            }
            StepKind::ClearScraperMeta => {
                let plan =
                    ClearPlan::scraper(&self.config.scraper.tables, &self.config.scraper.cache_table);
                self.clear_step(step, plan).await
            }
            StepKind::ArchiveLogs => self.archive_step().await,
        }
    }

    fn retry(&self) -> RetryDriver {
        RetryDriver::new(self.config.retry.default.clone(), self.metrics.clone())
            .with_call_timeout(self.config.timeouts.call_timeout)
            .with_cancel(self.cancel.clone())
    }

    fn table_filter(&self) -> TableFilter {
        let env = &self.config.environment;
        TableFilter::new(&env.name)
            .with_api_prefix(env.api_prefix.clone())
            .with_name_prefix(env.table_name_prefix.clone())
    }

    fn new_plan(&self, step: StepKind) -> StepPlan {
        StepPlan::new(step, &self.config.environment.name, self.dry_run)
    }

    /// Show the plan, then ask. Dry runs and empty plans need no confirmation.
    async fn gate(&self, plan: &StepPlan) -> Result<(), SweepError> {
        if self.print_plans {
            eprint!("{plan}");
        }
        if self.dry_run || plan.is_empty() {
            return Ok(());
        }
        tokio::select! {
            confirmed = self.confirmer.confirm(plan.step) => confirmed,
            _ = self.cancel.cancelled() => Err(SweepError::Cancelled),
        }
    }

    async fn export_step(&self) -> StepReport {
        let step = StepKind::Export;
        let mut report = StepReport::new(step, self.dry_run);
        let retry = self.retry();

        let catalog = TableCatalog::new(self.services.tables.clone(), retry.clone());
        let tables = match catalog.list(&self.table_filter()).await {
            Ok(tables) => tables,
            Err(err) => return report.failed_with(err.into()),
        };

        let mut plan = self.new_plan(step);
        plan.target = Some(self.layout.table_root().to_path_buf());
        plan.entries = tables.iter().map(table_entry).collect();
        let gated = self.gate(&plan).await;
        report.plan = Some(plan);
        if let Err(err) = gated {
            return report.failed_with(err);
        }

        let exporter = TableExporter::new(
            self.services.tables.clone(),
            retry,
            self.layout.clone(),
            ExportOptions {
                workers: self.config.concurrency.table_workers,
                null_sentinel: self.config.csv.null_sentinel.clone(),
                page_limit: None,
                dry_run: self.dry_run,
            },
        );
        let exported = exporter.export_all(tables).await;

        report.entities = exported.exported.len();
        report.planned = exported.planned.len();
        report.skipped = exported.skipped.len();
        report.failed = exported.failures.len();
        report.items = exported.rows();
        report.files = exported.files_written();
        report.bytes = exported.exported.iter().map(|t| t.bytes).sum();

        if let Some(err) = exported.error() {
            return report.failed_with(err);
        }
        if report.files > 0 {
            self.mirror(self.layout.table_root(), &mut report).await;
        }
        report
    }

    async fn clear_step(&self, step: StepKind, clear: ClearPlan) -> StepReport {
        let mut report = StepReport::new(step, self.dry_run);
        let retry = self.retry();

        let catalog = TableCatalog::new(self.services.tables.clone(), retry.clone());
        let resolved = match catalog.resolve(&self.table_filter(), &clear.models).await {
            Ok(resolved) => resolved,
            Err(err) => return report.failed_with(err.into()),
        };

        let mut plan = self.new_plan(step);
        plan.entries = resolved
            .iter()
            .filter(|r| !clear.protects(&r.model))
            .filter_map(|r| r.table.as_ref())
            .map(table_entry)
            .collect();
        plan.protected = clear.protected.clone();
        let gated = self.gate(&plan).await;
        report.plan = Some(plan);
        if let Err(err) = gated {
            return report.failed_with(err);
        }

        let writer = BatchWriter::new(
            self.services.tables.clone(),
            retry.clone(),
            self.config.retry.throttle.clone(),
        )
        .with_chunk_concurrency(self.config.concurrency.chunk_concurrency);
        let clearer = TableClearer::new(
            self.services.tables.clone(),
            retry,
            writer,
            ClearOptions {
                progress_interval: self.config.clear.progress_interval,
                verify_attempts: self.config.clear.verify_attempts,
                verify_delay: self.config.clear.verify_delay,
                page_limit: None,
                dry_run: self.dry_run,
            },
        );
        let cleared = clearer.clear_tables(&clear, &resolved).await;

        report.entities = cleared.cleared.len();
        report.planned = cleared.planned.len();
        report.skipped = cleared.skipped.len();
        report.failed = cleared.failures.len();
        report.items = cleared.deleted();

        if let Some(err) = cleared.error() {
            return report.failed_with(err);
        }
        report
    }

    async fn archive_step(&self) -> StepReport {
        let step = StepKind::ArchiveLogs;
        let mut report = StepReport::new(step, self.dry_run);
        let retry = self.retry();

        let filter = GroupFilter::new(&self.config.environment.name)
            .with_suffix(self.config.logs.group_contains.clone());
        let catalog = LogCatalog::new(self.services.logs.clone(), retry.clone());
        let groups = match catalog.list_groups(&filter).await {
            Ok(groups) => groups,
            Err(err) => return report.failed_with(err.into()),
        };

        let mut plan = self.new_plan(step);
        plan.target = Some(self.layout.log_root().to_path_buf());
        for group in &groups {
            let streams = match catalog.count_streams(&group.name).await {
                Ok(streams) => streams,
                Err(err) => return report.failed_with(err.into()),
            };
            let detail = match group.stored_bytes {
                Some(bytes) => format!("{streams} streams, {bytes} bytes stored"),
                None => format!("{streams} streams"),
            };
            plan.entries.push(PlanEntry::new(&group.name, detail));
        }
        let gated = self.gate(&plan).await;
        report.plan = Some(plan);
        if let Err(err) = gated {
            return report.failed_with(err);
        }

        let archiver = LogArchiver::new(
            self.services.logs.clone(),
            retry,
            self.layout.clone(),
            ArchiveOptions {
                group_workers: self.config.concurrency.group_workers,
                stream_workers: self.config.concurrency.stream_workers,
                page_limit: self.config.logs.page_limit,
                max_events_per_file: self.config.logs.max_events_per_file,
                dry_run: self.dry_run,
            },
        );
        let archived = archiver.archive_all(groups).await;

        report.entities = archived.archived.len();
        report.planned = archived.planned.len();
        report.failed = archived.failures.len();
        report.skipped = archived.skipped.len();
        report.items = archived.events();
        report.files = archived.files();
        report.bytes = archived.archived.iter().map(|g| g.bytes).sum();

        if let Some(err) = archived.error() {
            return report.failed_with(err);
        }
        if report.files > 0 {
            self.mirror(self.layout.log_root(), &mut report).await;
        }
        report
    }

    /// Copy a finished backup tree to the configured object store.
    async fn mirror(&self, root: &Path, report: &mut StepReport) {
        let Some(dsn) = &self.config.backup.mirror_dsn else {
            return;
        };
        if self.dry_run {
            return;
        }

        let mirrored = match BackupMirror::from_dsn(dsn) {
            Ok(mirror) => mirror.mirror_directory(root).await,
            Err(err) => Err(err),
        };
        match mirrored {
            Ok(mirrored) => report.mirrored_files = Some(mirrored.files_uploaded),
            Err(err) => {
                tracing::error!(root = %root.display(), error = ?err, "Mirroring backup failed");
                report.fail(SweepError::io(root, io::Error::other(err)));
            }
        }
    }

    /// The report goes next to the table backup, or next to the log archive
    /// when only the archive step ran.
    async fn persist_report(&self, report: &RunReport) {
        if self.dry_run || !self.config.backup.write_report || report.steps.is_empty() {
            return;
        }
        let logs_only = report.steps.iter().all(|s| s.step == StepKind::ArchiveLogs);
        let dir = if logs_only {
            self.layout.log_root()
        } else {
            self.layout.table_root()
        };
        match report.write_json(dir).await {
            Ok(bytes) => tracing::debug!(dir = %dir.display(), bytes, "Run report written"),
            Err(err) => tracing::error!(error = %err, "Failed to write run report"),
        }
    }
}

fn table_entry(table: &TableDescriptor) -> PlanEntry {
    let mut detail = match table.item_count_estimate {
        Some(items) => format!("~{items} items"),
        None => "size unknown".to_string(),
    };
    if !table.status.is_active() {
        detail.push_str(&format!(", status {:?}, will be skipped", table.status));
    }
    PlanEntry::new(&table.name, detail)
}
