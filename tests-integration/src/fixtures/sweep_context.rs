use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::{Configuration, RetryPolicy};
use logs::LogEvent;
use logs::memory::InMemoryLogService;
use orchestrator::{Confirmer, Orchestrator, Services};
use tables::memory::InMemoryTableService;
use tables::{Item, KeySchema};
use tempfile::TempDir;

use crate::generators;

/// In-memory services plus a configuration pointing at a temporary backup root.
pub struct SweepTestContext {
    pub tables: Arc<InMemoryTableService>,
    pub logs: Arc<InMemoryLogService>,
    pub config: Configuration,
    pub temp_dir: TempDir,
}

impl SweepTestContext {
    pub fn new(environment: &str) -> Result<Self> {
        Self::with_services(
            environment,
            InMemoryTableService::new(),
            InMemoryLogService::new(),
        )
    }

    pub fn with_services(
        environment: &str,
        tables: InMemoryTableService,
        logs: InMemoryLogService,
    ) -> Result<Self> {
        crate::init_test_logging();
        let temp_dir = TempDir::new()?;

        let mut config = Configuration::default();
        config.environment.name = environment.to_string();
        config.backup.root = Some(temp_dir.path().to_path_buf());
        config.clear.verify_delay = Duration::from_millis(1);
        config.retry.default = RetryPolicy {
            max_attempts: 12,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.2,
        };
        config.retry.throttle = RetryPolicy {
            max_attempts: 20,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.2,
        };

        Ok(Self {
            tables: Arc::new(tables),
            logs: Arc::new(logs),
            config,
            temp_dir,
        })
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn services(&self) -> Services {
        Services::new(self.tables.clone(), self.logs.clone())
    }

    pub fn orchestrator(&self, confirmer: Confirmer, dry_run: bool) -> Result<Orchestrator> {
        Ok(Orchestrator::new(self.config.clone(), self.services(), confirmer, dry_run)?.quiet_plans())
    }

    pub fn auto(&self) -> Result<Orchestrator> {
        self.orchestrator(Confirmer::auto(), false)
    }

    pub fn table_name(&self, model: &str) -> String {
        format!("{model}-{}", self.config.environment.name)
    }

    /// Create `<model>-<env>` keyed on `id` and fill it with `count` generated items.
    pub fn seed_table(&self, model: &str, count: usize) -> String {
        let table = self.table_name(model);
        self.tables.create_table(&table, KeySchema::new("id"));
        self.tables
            .insert_items(&table, (0..count).map(|i| generators::record(model, i)));
        table
    }

    pub fn seed_items(&self, table: &str, items: impl IntoIterator<Item = Item>) {
        self.tables.create_table(table, KeySchema::new("id"));
        self.tables.insert_items(table, items);
    }

    /// Create a log group whose streams hold the given number of events each.
    pub fn seed_log_group(&self, group: &str, streams: &[(&str, usize)]) {
        self.logs.create_group(group);
        for (n, (stream, events)) in streams.iter().enumerate() {
            let base = 1_736_840_000_000 + (n as i64) * 1_000_000;
            self.logs.put_events(
                group,
                stream,
                generators::events(base, *events),
            );
        }
    }

    /// Every file below the backup root, sorted.
    pub fn backup_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut pending = vec![self.root().to_path_buf()];
        while let Some(dir) = pending.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    files.push(path);
                }
            }
        }
        files.sort();
        files
    }

    /// Sidecar files, without the run report.
    pub fn sidecars(&self) -> Vec<PathBuf> {
        self.backup_files()
            .into_iter()
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .filter(|p| p.file_name().is_some_and(|n| n != orchestrator::REPORT_FILE))
            .collect()
    }

    pub fn read_events(path: &Path) -> Result<Vec<LogEvent>> {
        let value: serde_json::Value = serde_json::from_slice(&std::fs::read(path)?)?;
        Ok(serde_json::from_value(value["events"].clone())?)
    }
}
