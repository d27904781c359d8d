use anyhow::{Context, Result};
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload, aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Create an object store from a DSN string
///
/// Supported forms:
/// - `file:///path/to/dir`
/// - `memory://`
/// - `s3://bucket/prefix` (AWS, credentials and region from the environment)
/// - `s3://access:secret@host:port/bucket/prefix` (S3-compatible endpoints)
pub fn create_object_store_from_dsn(dsn: &str) -> Result<Arc<dyn ObjectStore>> {
    let url =
        Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", dsn, e))?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(anyhow::anyhow!(
                    "File DSN must specify a path: file:///path/to/storage"
                ));
            }
            std::fs::create_dir_all(path)
                .with_context(|| format!("Failed to create mirror directory {path}"))?;
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => {
            let builder = create_s3_builder_from_dsn(&url)?;
            Ok(Arc::new(builder.build()?))
        }
        scheme => Err(anyhow::anyhow!(
            "Unsupported storage scheme: {}. Supported: file, memory, s3",
            scheme
        )),
    }
}

/// Key prefix inside the store that a DSN points at.
///
/// For `s3://bucket/a/b` this is `a/b`; for S3-compatible endpoints the first
/// path segment is the bucket and is skipped. File and memory stores have no prefix.
pub fn object_prefix_from_dsn(dsn: &str) -> Result<ObjectPath> {
    let url =
        Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", dsn, e))?;
    if url.scheme() != "s3" {
        return Ok(ObjectPath::default());
    }

    let segments: Vec<&str> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let skip = if is_custom_endpoint(&url) { 1 } else { 0 };
    Ok(ObjectPath::from_iter(segments.into_iter().skip(skip)))
}

fn is_custom_endpoint(dsn: &Url) -> bool {
    dsn.port().is_some() || dsn.host_str().is_some_and(|h| h == "localhost" || h.contains('.'))
}

/// Create an S3 builder from a DSN
pub fn create_s3_builder_from_dsn(dsn: &Url) -> Result<AmazonS3Builder> {
    let host = dsn
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("Missing S3 host in DSN"))?;

    if !is_custom_endpoint(dsn) {
        // Plain AWS: host is the bucket, everything else comes from the environment
        return Ok(AmazonS3Builder::from_env().with_bucket_name(host));
    }

    let bucket = dsn
        .path()
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default();

    if bucket.is_empty() {
        return Err(anyhow::anyhow!(
            "S3 DSN must specify a bucket: s3://host/bucket"
        ));
    }

    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

    let access_key = dsn.username();
    let secret_key = dsn.password().unwrap_or("");
    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    let scheme = if dsn.port() == Some(443) { "https" } else { "http" };
    let endpoint = match dsn.port() {
        Some(p) => format!("{scheme}://{host}:{p}"),
        None => format!("{scheme}://{host}"),
    };

    Ok(builder
        .with_endpoint(endpoint)
        .with_allow_http(true)
        .with_virtual_hosted_style_request(false))
}

/// Result of copying a backup tree into the object store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorReport {
    pub files_uploaded: usize,
    pub bytes_uploaded: u64,
}

/// Copies finished backup directories into an object store.
#[derive(Clone)]
pub struct BackupMirror {
    store: Arc<dyn ObjectStore>,
    prefix: ObjectPath,
}

impl BackupMirror {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: ObjectPath) -> Self {
        Self { store, prefix }
    }

    pub fn from_dsn(dsn: &str) -> Result<Self> {
        Ok(Self::new(
            create_object_store_from_dsn(dsn)?,
            object_prefix_from_dsn(dsn)?,
        ))
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Upload every file below `local_root` to `<prefix>/<dir name of local_root>/...`.
    ///
    /// Files still being written (`*.partial`) are skipped.
    pub async fn mirror_directory(&self, local_root: &Path) -> Result<MirrorReport> {
        let root_name = local_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("Backup root {} has no name", local_root.display()))?;

        let mut report = MirrorReport::default();
        let mut pending: Vec<PathBuf> = vec![local_root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("Failed to read {}", dir.display()))?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().is_some_and(|ext| ext == "partial") {
                    continue;
                }

                let relative = path.strip_prefix(local_root)?;
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .fold(self.prefix.child(root_name.as_str()), |acc, part| {
                        acc.child(part.as_str())
                    });

                let data = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let size = data.len() as u64;

                self.store
                    .put(&key, PutPayload::from(Bytes::from(data)))
                    .await
                    .with_context(|| format!("Failed to upload {key}"))?;

                tracing::debug!(key = %key, size_bytes = size, "Mirrored backup file");
                report.files_uploaded += 1;
                report.bytes_uploaded += size;
            }
        }

        tracing::info!(
            root = %local_root.display(),
            files = report.files_uploaded,
            bytes = report.bytes_uploaded,
            "Backup mirrored to object store"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[test]
    fn test_create_memory_object_store() {
        let object_store = create_object_store_from_dsn("memory://").unwrap();
        assert!(Arc::strong_count(&object_store) == 1);
    }

    #[test]
    fn test_create_filesystem_object_store() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().to_string_lossy();
        let dsn = format!("file://{path}");

        let object_store = create_object_store_from_dsn(&dsn).unwrap();
        assert!(Arc::strong_count(&object_store) == 1);
    }

    #[test]
    fn test_invalid_dsn() {
        let result = create_object_store_from_dsn("not-a-url");
        assert!(
            result
                .err()
                .unwrap()
                .to_string()
                .contains("Invalid storage DSN")
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        let result = create_object_store_from_dsn("gcs://bucket/prefix");
        assert!(
            result
                .err()
                .unwrap()
                .to_string()
                .contains("Unsupported storage scheme")
        );
    }

    #[test]
    fn test_s3_dsn_parsing() {
        let result = create_s3_builder_from_dsn(&Url::parse("s3://backups/kingsroom").unwrap());
        assert!(result.is_ok());

        let result = create_s3_builder_from_dsn(
            &Url::parse("s3://access:secret@localhost:9000/bucket").unwrap(),
        );
        assert!(result.is_ok());

        let result = create_s3_builder_from_dsn(&Url::parse("s3://localhost:9000/").unwrap());
        assert!(
            result
                .err()
                .unwrap()
                .to_string()
                .contains("must specify a bucket")
        );
    }

    #[test]
    fn test_object_prefix_from_dsn() {
        assert_eq!(
            object_prefix_from_dsn("s3://backups/kingsroom/dev").unwrap(),
            ObjectPath::from("kingsroom/dev")
        );
        assert_eq!(
            object_prefix_from_dsn("s3://localhost:9000/bucket/nightly").unwrap(),
            ObjectPath::from("nightly")
        );
        assert_eq!(
            object_prefix_from_dsn("memory://").unwrap(),
            ObjectPath::default()
        );
    }

    #[tokio::test]
    async fn test_mirror_directory_preserves_relative_paths() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let root = temp_dir.path().join("logbackup_20250114_093015");
        std::fs::create_dir_all(root.join("_aws_lambda_fetch-dev")).unwrap();
        std::fs::write(root.join("Game.csv"), b"id\n1\n").unwrap();
        std::fs::write(root.join("_aws_lambda_fetch-dev/run.json"), b"{}").unwrap();
        std::fs::write(root.join("skip.json.partial"), b"half").unwrap();

        let mirror = BackupMirror::new(Arc::new(InMemory::new()), ObjectPath::from("nightly"));
        let report = mirror.mirror_directory(&root).await.unwrap();

        assert_eq!(report.files_uploaded, 2);
        assert_eq!(report.bytes_uploaded, 7);

        let mut keys: Vec<String> = mirror
            .store()
            .list(None)
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "nightly/logbackup_20250114_093015/Game.csv",
                "nightly/logbackup_20250114_093015/_aws_lambda_fetch-dev/run.json",
            ]
        );
    }
}
