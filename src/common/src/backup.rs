//! On-disk layout of one run's backups.
//!
//! ```text
//! <root>/<table_dir_prefix>_<stamp>/<table>.csv
//! <root>/<log_dir_prefix>_<stamp>/<group with '/' as '_'>/<sidecar>.json
//! ```

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use crate::config::BackupConfig;

/// Start time of a run; every step of the run writes under the same stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStamp {
    started_at: DateTime<Utc>,
}

impl RunStamp {
    pub fn now() -> Self {
        Self {
            started_at: Utc::now(),
        }
    }

    pub fn at(started_at: DateTime<Utc>) -> Self {
        Self { started_at }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Directory-safe label, e.g. `20250114_093015`
    pub fn label(&self) -> String {
        self.started_at.format("%Y%m%d_%H%M%S").to_string()
    }
}

/// Output directories owned by one run.
#[derive(Debug, Clone)]
pub struct BackupLayout {
    table_root: PathBuf,
    log_root: PathBuf,
    stamp: RunStamp,
}

impl BackupLayout {
    pub fn new(config: &BackupConfig, stamp: RunStamp) -> Self {
        let base = config.root.clone().unwrap_or_else(|| PathBuf::from("."));
        let label = stamp.label();
        Self {
            table_root: base.join(format!("{}_{label}", config.table_dir_prefix)),
            log_root: base.join(format!("{}_{label}", config.log_dir_prefix)),
            stamp,
        }
    }

    pub fn table_root(&self) -> &Path {
        &self.table_root
    }

    pub fn log_root(&self) -> &Path {
        &self.log_root
    }

    pub fn stamp(&self) -> &RunStamp {
        &self.stamp
    }

    pub fn table_csv_path(&self, table: &str) -> PathBuf {
        self.table_root.join(format!("{table}.csv"))
    }

    pub fn log_group_dir(&self, group: &str) -> PathBuf {
        self.log_root.join(escape_group_name(group))
    }
}

/// Log group names contain path separators; flatten them into one component.
pub fn escape_group_name(group: &str) -> String {
    group.replace(['/', '\\'], "_")
}

/// Write `bytes` to `path` so that the file is complete and durable once this
/// returns: the data goes to a `.partial` sibling, is fsynced, renamed into
/// place, and the parent directory is fsynced.
///
/// Returns the number of bytes written.
pub async fn write_durable(path: &Path, bytes: &[u8]) -> io::Result<u64> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    tokio::fs::create_dir_all(parent).await?;

    let partial = partial_path(path);
    let written = async {
        let mut file = tokio::fs::File::create(&partial).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        io::Result::Ok(())
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }

    tokio::fs::rename(&partial, path).await?;
    sync_dir(parent).await?;
    Ok(bytes.len() as u64)
}

/// Sibling path used while a file is still being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Flush a directory entry table to disk.
#[cfg(unix)]
pub async fn sync_dir(dir: &Path) -> io::Result<()> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || std::fs::File::open(&dir)?.sync_all())
        .await
        .map_err(io::Error::other)?
}

#[cfg(not(unix))]
pub async fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stamp() -> RunStamp {
        RunStamp::at(Utc.with_ymd_and_hms(2025, 1, 14, 9, 30, 15).unwrap())
    }

    #[test]
    fn test_layout_paths() {
        let config = BackupConfig {
            root: Some(PathBuf::from("/backups")),
            ..Default::default()
        };
        let layout = BackupLayout::new(&config, stamp());

        assert_eq!(
            layout.table_root(),
            Path::new("/backups/dbbackup_20250114_093015")
        );
        assert_eq!(
            layout.table_csv_path("Game-abc-dev"),
            PathBuf::from("/backups/dbbackup_20250114_093015/Game-abc-dev.csv")
        );
        assert_eq!(
            layout.log_group_dir("/aws/lambda/fetch-dev"),
            PathBuf::from("/backups/logbackup_20250114_093015/_aws_lambda_fetch-dev")
        );
    }

    #[test]
    fn test_default_root_is_working_directory() {
        let layout = BackupLayout::new(&BackupConfig::default(), stamp());
        assert_eq!(layout.table_root(), Path::new("./dbbackup_20250114_093015"));
        assert_eq!(layout.log_root(), Path::new("./logbackup_20250114_093015"));
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/tmp/a/b.json")),
            PathBuf::from("/tmp/a/b.json.partial")
        );
    }

    #[tokio::test]
    async fn test_write_durable_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/file.json");

        let written = write_durable(&path, b"{\"ok\":true}").await.unwrap();

        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"ok\":true}");
        assert!(!partial_path(&path).exists());
    }
}
