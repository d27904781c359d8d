use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use common::backup::{BackupLayout, sync_dir};
use common::{RetryDriver, SweepError};
use futures::StreamExt;

use crate::catalog::LogCatalog;
use crate::model::{LogGroup, LogStream};
use crate::service::LogService;
use crate::sidecar::{Sidecar, WrittenSidecar};

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub group_workers: usize,
    pub stream_workers: usize,
    /// Events requested per page
    pub page_limit: Option<i32>,
    /// Split a page into sidecars of at most this many events
    pub max_events_per_file: Option<usize>,
    pub dry_run: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            group_workers: 2,
            stream_workers: 4,
            page_limit: None,
            max_events_per_file: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamArchive {
    pub stream: String,
    pub events: u64,
    pub files: Vec<WrittenSidecar>,
}

#[derive(Debug, Clone)]
pub struct GroupArchive {
    pub group: String,
    pub streams: usize,
    pub events: u64,
    pub files: usize,
    pub bytes: u64,
    /// False when the group vanished before its deletion was requested
    pub deleted: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PlannedGroup {
    pub group: String,
    pub streams: usize,
    pub stored_bytes: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct GroupFailure {
    pub group: String,
    pub error: SweepError,
}

#[derive(Debug, Clone)]
pub struct SkippedGroup {
    pub group: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveReport {
    pub archived: Vec<GroupArchive>,
    pub planned: Vec<PlannedGroup>,
    pub skipped: Vec<SkippedGroup>,
    pub failures: Vec<GroupFailure>,
}

impl ArchiveReport {
    pub fn events(&self) -> u64 {
        self.archived.iter().map(|g| g.events).sum()
    }

    pub fn files(&self) -> usize {
        self.archived.iter().map(|g| g.files).sum()
    }

    pub fn error(&self) -> Option<SweepError> {
        SweepError::from_failures(
            "log groups",
            self.failures.iter().map(|f| &f.error),
            self.archived.len() + self.failures.len(),
        )
    }
}

/// Archives every stream of a log group to sidecars, then deletes the group.
///
/// A group is only deleted once every stream it listed has all of its event
/// runs on disk; any failure before that leaves the group in place.
///
/// Escaped group and stream names can coincide, so every sidecar path is
/// claimed once per archiver before it is written.
#[derive(Clone)]
pub struct LogArchiver {
    service: Arc<dyn LogService>,
    retry: RetryDriver,
    catalog: LogCatalog,
    layout: BackupLayout,
    options: ArchiveOptions,
    claimed: Arc<Mutex<HashSet<PathBuf>>>,
}

impl LogArchiver {
    pub fn new(
        service: Arc<dyn LogService>,
        retry: RetryDriver,
        layout: BackupLayout,
        options: ArchiveOptions,
    ) -> Self {
        Self {
            catalog: LogCatalog::new(service.clone(), retry.clone()),
            service,
            retry,
            layout,
            options,
            claimed: Arc::default(),
        }
    }

    pub async fn archive_all(&self, groups: Vec<LogGroup>) -> ArchiveReport {
        let mut report = ArchiveReport::default();

        if self.options.dry_run {
            for group in groups {
                match self.catalog.count_streams(&group.name).await {
                    Ok(streams) => {
                        tracing::info!(
                            group = %group.name,
                            streams,
                            stored_bytes = ?group.stored_bytes,
                            dir = %self.layout.log_group_dir(&group.name).display(),
                            "[DRY-RUN] Would archive and delete log group"
                        );
                        report.planned.push(PlannedGroup {
                            group: group.name,
                            streams,
                            stored_bytes: group.stored_bytes,
                        });
                    }
                    Err(err) if err.is_not_found() => report.skipped.push(SkippedGroup {
                        group: group.name,
                        reason: "not found".to_string(),
                    }),
                    Err(err) => report.failures.push(GroupFailure {
                        group: group.name,
                        error: err.into(),
                    }),
                }
            }
            return report;
        }

        let results: Vec<(String, Result<GroupArchive, SweepError>)> = futures::stream::iter(groups)
            .map(|group| async move {
                let result = self.archive_group(&group).await;
                (group.name, result)
            })
            .buffer_unordered(self.options.group_workers.max(1))
            .collect()
            .await;

        for (group, result) in results {
            match result {
                Ok(archive) => report.archived.push(archive),
                Err(SweepError::NotFound(error)) => {
                    tracing::warn!(group = %group, error = %error, "Log group disappeared before archiving, skipping");
                    report.skipped.push(SkippedGroup {
                        group,
                        reason: "not found".to_string(),
                    });
                }
                Err(error) => {
                    tracing::error!(group = %group, error = %error, "Log group left in place");
                    report.failures.push(GroupFailure { group, error });
                }
            }
        }
        report.archived.sort_by(|a, b| a.group.cmp(&b.group));
        report.failures.sort_by(|a, b| a.group.cmp(&b.group));
        report.skipped.sort_by(|a, b| a.group.cmp(&b.group));

        tracing::info!(
            groups = report.archived.len(),
            files = report.files(),
            events = report.events(),
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            "Log archive finished"
        );
        report
    }

    pub async fn archive_group(&self, group: &LogGroup) -> Result<GroupArchive, SweepError> {
        let started = Instant::now();
        let cancel = self.retry.cancel_token().clone();
        let dir = self.layout.log_group_dir(&group.name);

        let streams = self.catalog.list_streams(&group.name).await?;
        tracing::info!(group = %group.name, streams = streams.len(), "Archiving log group");

        let results: Vec<Result<StreamArchive, SweepError>> = futures::stream::iter(streams.iter())
            .map(|stream| self.archive_stream(&group.name, stream, &dir))
            .buffer_unordered(self.options.stream_workers.max(1))
            .collect()
            .await;

        let mut archived = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(stream) => archived.push(stream),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(SweepError::Cancelled);
        }

        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            sync_dir(&dir).await.map_err(|e| SweepError::io(&dir, e))?;
        }

        let deleted = match self
            .retry
            .execute("DeleteLogGroup", || self.service.delete_group(&group.name))
            .await
        {
            Ok(()) => true,
            Err(err) if err.is_not_found() => {
                tracing::warn!(group = %group.name, "Log group already gone");
                false
            }
            Err(err) => return Err(err.into()),
        };

        let archive = GroupArchive {
            group: group.name.clone(),
            streams: archived.len(),
            events: archived.iter().map(|s| s.events).sum(),
            files: archived.iter().map(|s| s.files.len()).sum(),
            bytes: archived
                .iter()
                .flat_map(|s| s.files.iter())
                .map(|f| f.bytes)
                .sum(),
            deleted,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            group = %archive.group,
            streams = archive.streams,
            events = archive.events,
            files = archive.files,
            bytes = archive.bytes,
            "Log group archived and deleted"
        );
        Ok(archive)
    }

    /// Page through one stream oldest-first, writing each page as it arrives.
    ///
    /// The stream ends when the service hands back the token it was given;
    /// an empty page alone does not end it.
    async fn archive_stream(
        &self,
        group: &str,
        stream: &LogStream,
        dir: &Path,
    ) -> Result<StreamArchive, SweepError> {
        let cancel = self.retry.cancel_token();
        let mut archive = StreamArchive {
            stream: stream.name.clone(),
            ..Default::default()
        };
        let mut token: Option<String> = None;

        loop {
            let request_token = token.clone();
            let page = match self
                .retry
                .execute("GetLogEvents", || {
                    self.service
                        .get_events(group, &stream.name, request_token.clone(), self.options.page_limit)
                })
                .await
            {
                Ok(page) => page,
                Err(err) if err.is_not_found() => {
                    tracing::warn!(group, stream = %stream.name, "Log stream disappeared while archiving");
                    break;
                }
                Err(err) => return Err(err.into()),
            };

            if cancel.is_cancelled() {
                return Err(SweepError::Cancelled);
            }

            let chunk = self.options.max_events_per_file.unwrap_or(page.events.len()).max(1);
            for events in page.events.chunks(chunk) {
                let sidecar = Sidecar::new(group, &stream.name, events.to_vec());
                let Some(stem) = sidecar.file_stem() else {
                    continue;
                };
                let name = self.claim_name(dir, stem);
                let written = sidecar.persist(dir, &name).await?;
                tracing::debug!(
                    group,
                    stream = %stream.name,
                    events = written.events,
                    bytes = written.bytes,
                    path = %written.path.display(),
                    "Wrote sidecar"
                );
                archive.events += written.events as u64;
                archive.files.push(written);
            }

            match page.next_forward_token {
                Some(next) if Some(&next) != token.as_ref() => token = Some(next),
                _ => break,
            }
        }

        Ok(archive)
    }

    /// `stem`, or `stem_<n>` when another sidecar in `dir` already claimed it.
    fn claim_name(&self, dir: &Path, stem: String) -> String {
        let mut claimed = self.claimed.lock().unwrap_or_else(|p| p.into_inner());
        let mut name = stem.clone();
        let mut n = 0;
        while !claimed.insert(dir.join(&name)) {
            n += 1;
            name = format!("{stem}_{n}");
        }
        name
    }
}
