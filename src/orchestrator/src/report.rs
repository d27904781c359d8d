//! Run summary: printed as the closing block and written as `run-report.json`.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use common::backup::write_durable;
use common::error::exit;
use common::{RetrySummary, SweepError};
use serde::Serialize;
use uuid::Uuid;

use crate::plan::{StepKind, StepPlan};

pub const REPORT_FILE: &str = "run-report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// Dry run: planned only
    Planned,
    Failed,
    Aborted,
    Cancelled,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Planned => "planned",
            StepStatus::Failed => "failed",
            StepStatus::Aborted => "aborted",
            StepStatus::Cancelled => "cancelled",
        })
    }
}

/// Outcome of one step.
///
/// `items` is rows exported, items deleted or events archived depending on
/// the step; `entities` counts tables or log groups finished.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: StepKind,
    pub status: StepStatus,
    pub entities: usize,
    pub planned: usize,
    pub skipped: usize,
    pub failed: usize,
    pub items: u64,
    pub files: usize,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirrored_files: Option<usize>,
    pub retries: RetrySummary,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub plan: Option<StepPlan>,
    #[serde(skip)]
    pub failure: Option<SweepError>,
}

impl StepReport {
    pub fn new(step: StepKind, dry_run: bool) -> Self {
        Self {
            step,
            status: if dry_run {
                StepStatus::Planned
            } else {
                StepStatus::Succeeded
            },
            entities: 0,
            planned: 0,
            skipped: 0,
            failed: 0,
            items: 0,
            files: 0,
            bytes: 0,
            mirrored_files: None,
            retries: RetrySummary::default(),
            duration_ms: 0,
            error: None,
            plan: None,
            failure: None,
        }
    }

    /// Mark the step failed with `error`, replacing any earlier failure.
    pub fn fail(&mut self, error: SweepError) {
        self.status = match &error {
            SweepError::Aborted(_) => StepStatus::Aborted,
            e if e.is_cancelled() => StepStatus::Cancelled,
            _ => StepStatus::Failed,
        };
        self.error = Some(error.to_string());
        self.failure = Some(error);
    }

    pub fn failed_with(mut self, error: SweepError) -> Self {
        self.fail(error);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }

    fn unit(&self) -> &'static str {
        match self.step {
            StepKind::Export => "rows",
            StepKind::ClearDeclared | StepKind::ClearScraperMeta => "items deleted",
            StepKind::ArchiveLogs => "events",
        }
    }

    fn entity(&self) -> &'static str {
        match self.step {
            StepKind::ArchiveLogs => "groups",
            _ => "tables",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub environment: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub steps: Vec<StepReport>,
    pub retries: RetrySummary,
}

impl RunReport {
    pub fn new(environment: impl Into<String>, started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            environment: environment.into(),
            started_at,
            finished_at: None,
            dry_run,
            steps: Vec::new(),
            retries: RetrySummary::default(),
        }
    }

    pub fn finish(&mut self, retries: RetrySummary) {
        self.retries = retries;
        self.finished_at = Some(Utc::now());
    }

    pub fn step(&self, step: StepKind) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step == step)
    }

    /// The failure that ended the run, if any.
    pub fn error(&self) -> Option<&SweepError> {
        self.steps.iter().find_map(|s| s.failure.as_ref())
    }

    pub fn exit_code(&self) -> i32 {
        self.error().map_or(exit::SUCCESS, SweepError::exit_code)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// Durably write the report into `dir`.
    pub async fn write_json(&self, dir: &Path) -> Result<u64, SweepError> {
        let path = dir.join(REPORT_FILE);
        let bytes = self
            .to_json()
            .map_err(|e| SweepError::io(&path, e.into()))?;
        write_durable(&path, &bytes)
            .await
            .map_err(|e| SweepError::io(&path, e))
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.dry_run { " [DRY-RUN]" } else { "" };
        writeln!(
            f,
            "== Summary: run {} (environment {}){mode}",
            self.run_id, self.environment
        )?;
        for step in &self.steps {
            write!(
                f,
                "   {:<30} {:<10} {} {}, {} {}",
                step.step.to_string(),
                step.status.to_string(),
                step.entities,
                step.entity(),
                step.items,
                step.unit(),
            )?;
            if step.files > 0 {
                write!(f, ", {} files", step.files)?;
            }
            if step.planned > 0 {
                write!(f, ", {} planned", step.planned)?;
            }
            if step.skipped > 0 {
                write!(f, ", {} skipped", step.skipped)?;
            }
            if step.failed > 0 {
                write!(f, ", {} failed", step.failed)?;
            }
            if step.retries.retries > 0 {
                write!(f, ", {} retries", step.retries.retries)?;
            }
            writeln!(f, " ({} ms)", step.duration_ms)?;
            if let Some(error) = &step.error {
                writeln!(f, "      error: {error}")?;
            }
        }
        writeln!(
            f,
            "   service calls: {}, retries: {} ({} throttled, {} transient), backoff: {} ms",
            self.retries.calls,
            self.retries.retries,
            self.retries.throttles,
            self.retries.transients,
            self.retries.backoff_ms,
        )
    }
}
