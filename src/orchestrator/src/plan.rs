//! Pre-flight plans: what a step is about to touch.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// The four operations a run is made of, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Export,
    ClearDeclared,
    ClearScraperMeta,
    ArchiveLogs,
}

impl StepKind {
    pub const ALL: [StepKind; 4] = [
        StepKind::Export,
        StepKind::ClearDeclared,
        StepKind::ClearScraperMeta,
        StepKind::ArchiveLogs,
    ];

    /// Word the operator must type to let the step run.
    pub fn keyword(self) -> &'static str {
        match self {
            StepKind::Export => "yes",
            StepKind::ClearDeclared | StepKind::ClearScraperMeta => "DELETE",
            StepKind::ArchiveLogs => "ARCHIVE",
        }
    }

    pub fn is_destructive(self) -> bool {
        !matches!(self, StepKind::Export)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepKind::Export => "export tables",
            StepKind::ClearDeclared => "clear declared tables",
            StepKind::ClearScraperMeta => "clear scraper metadata",
            StepKind::ArchiveLogs => "archive and delete log groups",
        })
    }
}

/// One table or log group a step will touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub name: String,
    pub detail: String,
}

impl PlanEntry {
    pub fn new(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepPlan {
    pub step: StepKind,
    pub environment: String,
    /// Directory the step writes to, if any
    pub target: Option<PathBuf>,
    pub entries: Vec<PlanEntry>,
    /// Tables the step must leave alone
    pub protected: Vec<String>,
    pub dry_run: bool,
}

impl StepPlan {
    pub fn new(step: StepKind, environment: impl Into<String>, dry_run: bool) -> Self {
        Self {
            step,
            environment: environment.into(),
            target: None,
            entries: Vec::new(),
            protected: Vec::new(),
            dry_run,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for StepPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.dry_run { " [DRY-RUN]" } else { "" };
        writeln!(f, "== Plan: {} (environment {}){mode}", self.step, self.environment)?;
        if let Some(target) = &self.target {
            writeln!(f, "   output: {}", target.display())?;
        }
        if self.entries.is_empty() {
            writeln!(f, "   nothing to do")?;
        }
        let width = self.entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
        for entry in &self.entries {
            writeln!(f, "   - {:<width$}  {}", entry.name, entry.detail)?;
        }
        for table in &self.protected {
            writeln!(f, "   kept: {table}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords() {
        assert_eq!(StepKind::Export.keyword(), "yes");
        assert_eq!(StepKind::ClearDeclared.keyword(), "DELETE");
        assert!(StepKind::ALL.iter().filter(|s| s.is_destructive()).count() == 3);
    }

    #[test]
    fn test_plan_rendering() {
        let mut plan = StepPlan::new(StepKind::ClearScraperMeta, "dev", true);
        plan.entries.push(PlanEntry::new("ScrapeURL-abc-dev", "~1739 items"));
        plan.entries.push(PlanEntry::new("ScraperJob-abc-dev", "~12 items"));
        plan.protected.push("S3Storage".into());

        let text = plan.to_string();
        assert!(text.starts_with("== Plan: clear scraper metadata (environment dev) [DRY-RUN]"));
        assert!(text.contains("   - ScrapeURL-abc-dev   ~1739 items"));
        assert!(text.contains("kept: S3Storage"));

        let empty = StepPlan::new(StepKind::ArchiveLogs, "dev", false);
        assert!(empty.to_string().contains("nothing to do"));
    }
}
