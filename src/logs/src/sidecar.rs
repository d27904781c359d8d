//! JSON sidecar files holding one event run of one stream.
//!
//! File name: `<firstTs>_<lastTs>__<escaped stream>.json`. Function log
//! streams are named `YYYY/MM/DD/[$LATEST]<token>`, which escapes to
//! `YYYY_MM_DD___LATEST_<token>`.

use std::path::{Path, PathBuf};

use common::SweepError;
use common::backup::write_durable;
use serde::{Deserialize, Serialize};

use crate::model::LogEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    pub group: String,
    pub stream: String,
    pub events: Vec<LogEvent>,
}

/// A sidecar persisted to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenSidecar {
    pub path: PathBuf,
    pub events: usize,
    pub bytes: u64,
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
pub fn escape_stream_name(stream: &str) -> String {
    stream
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl Sidecar {
    pub fn new(group: impl Into<String>, stream: impl Into<String>, events: Vec<LogEvent>) -> Self {
        Self {
            group: group.into(),
            stream: stream.into(),
            events,
        }
    }

    /// File stem without disambiguation; `None` for an empty run.
    pub fn file_stem(&self) -> Option<String> {
        let first = self.events.first()?.timestamp;
        let last = self.events.last()?.timestamp;
        Some(format!(
            "{first}_{last}__{}",
            escape_stream_name(&self.stream)
        ))
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Durably write the sidecar as `dir/<name>.json` and check the size on disk.
    ///
    /// An existing file at that path is an error and is left untouched.
    pub async fn persist(&self, dir: &Path, name: &str) -> Result<WrittenSidecar, SweepError> {
        let path = dir.join(format!("{name}.json"));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(SweepError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "sidecar already exists"),
            ));
        }
        let bytes = self
            .to_bytes()
            .map_err(|e| SweepError::io(&path, e.into()))?;

        let written = write_durable(&path, &bytes)
            .await
            .map_err(|e| SweepError::io(&path, e))?;
        let on_disk = tokio::fs::metadata(&path)
            .await
            .map_err(|e| SweepError::io(&path, e))?
            .len();

        if written != bytes.len() as u64 || on_disk != written {
            return Err(SweepError::io(
                &path,
                std::io::Error::other(format!(
                    "expected {} bytes, wrote {written}, found {on_disk}",
                    bytes.len()
                )),
            ));
        }

        Ok(WrittenSidecar {
            path,
            events: self.events.len(),
            bytes: on_disk,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sidecar() -> Sidecar {
        Sidecar::new(
            "/aws/lambda/fetchTournament-dev",
            "2025/01/14/[$LATEST]0a1b2c3d",
            vec![
                LogEvent::new(1736840000000, "START RequestId: 42"),
                LogEvent::new(1736840000950, "END RequestId: 42"),
            ],
        )
    }

    #[test]
    fn test_file_stem_from_lambda_stream() {
        assert_eq!(
            sidecar().file_stem().unwrap(),
            "1736840000000_1736840000950__2025_01_14___LATEST_0a1b2c3d"
        );
        assert!(Sidecar::new("g", "s", vec![]).file_stem().is_none());
    }

    #[test]
    fn test_body_shape() {
        let value: serde_json::Value = serde_json::from_slice(&sidecar().to_bytes().unwrap()).unwrap();
        assert_eq!(value["group"], "/aws/lambda/fetchTournament-dev");
        assert_eq!(value["events"][1]["timestamp"], 1736840000950i64);
        assert_eq!(value["events"][0]["message"], "START RequestId: 42");
    }

    #[tokio::test]
    async fn test_persist_reports_size_on_disk() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let sidecar = sidecar();
        let stem = sidecar.file_stem().unwrap();

        let written = sidecar.persist(temp_dir.path(), &stem).await.unwrap();

        let content = std::fs::read(&written.path).unwrap();
        assert_eq!(written.bytes, content.len() as u64);
        assert_eq!(written.events, 2);
        let back: Sidecar = serde_json::from_slice(&content).unwrap();
        assert_eq!(back, sidecar);
    }

    #[tokio::test]
    async fn test_persist_never_overwrites() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let first = sidecar();
        let stem = first.file_stem().unwrap();
        let written = first.persist(temp_dir.path(), &stem).await.unwrap();

        let other = Sidecar::new(first.group.clone(), "2025/01/14/_$LATEST_0a1b2c3d", first.events.clone());
        assert_eq!(other.file_stem().unwrap(), stem);
        let err = other.persist(temp_dir.path(), &stem).await.unwrap_err();

        assert!(matches!(err, SweepError::Io { .. }), "{err:?}");
        let back: Sidecar = serde_json::from_slice(&std::fs::read(&written.path).unwrap()).unwrap();
        assert_eq!(back, first);
    }
}
