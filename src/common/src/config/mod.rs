use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "datasweep.toml";

/// Errors raised while validating a loaded configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("environment name must not be empty")]
    EmptyEnvironment,

    #[error("table name in {list} must not be empty")]
    EmptyTableName { list: &'static str },

    #[error("table {table} appears twice in {list}")]
    DuplicateTable { list: &'static str, table: String },

    #[error("scraper table list names the preserved cache table {0}")]
    CacheTableNotExcluded(String),

    #[error("{field} must be positive")]
    NotPositive { field: &'static str },

    #[error("{field} must be between 0 and 1, got {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("invalid region '{0}'")]
    InvalidRegion(String),

    #[error("{field} is not a supported URL: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Load(String),
}

/// Cloud client settings. Credentials are always resolved by the SDK.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AwsConfig {
    /// Region override; unset falls back to the SDK's default provider chain
    pub region: Option<String>,
    /// Alternative endpoint, e.g. a local table-service emulator
    pub endpoint_url: Option<String>,
}

/// Which deployment the run targets.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Environment suffix: tables end with `-<name>`, log groups with `/<name>`
    pub name: String,
    /// Only tables whose name contains this string
    pub api_prefix: Option<String>,
    /// Only tables whose name starts with this string
    pub table_name_prefix: Option<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            name: "dev".to_string(),
            api_prefix: None,
            table_name_prefix: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Parent directory of the run's backup directories (defaults to the working directory)
    pub root: Option<PathBuf>,
    pub table_dir_prefix: String,
    pub log_dir_prefix: String,
    /// Object store DSN the finished backup tree is copied to (file://, memory://, s3://)
    pub mirror_dsn: Option<String>,
    /// Write `run-report.json` next to the table snapshots
    pub write_report: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root: None,
            table_dir_prefix: "dbbackup".to_string(),
            log_dir_prefix: "logbackup".to_string(),
            mirror_dsn: None,
            write_report: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Policy for ordinary service calls
    pub default: RetryPolicy,
    /// Policy for draining unprocessed batch requests
    pub throttle: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default: RetryPolicy::standard(),
            throttle: RetryPolicy::throttle(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Tables exported in parallel
    pub table_workers: usize,
    /// Batch chunks in flight per table
    pub chunk_concurrency: usize,
    /// Log groups archived in parallel
    pub group_workers: usize,
    /// Streams archived in parallel within one group
    pub stream_workers: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            table_workers: 4,
            chunk_concurrency: 4,
            group_workers: 2,
            stream_workers: 4,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline for one service call
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Deadline for one whole step; treated like cancellation when hit
    #[serde(with = "humantime_serde", default)]
    pub operation_timeout: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            operation_timeout: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct CsvConfig {
    /// Literal written for null attributes. Unset writes an empty field, which
    /// makes nulls indistinguishable from empty strings.
    pub null_sentinel: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClearConfig {
    /// Tables purged by the declared clear step, in purge order
    pub declared_tables: Vec<String>,
    /// Emit a progress line every N deletions
    pub progress_interval: u64,
    /// Re-count attempts after draining a table
    pub verify_attempts: u32,
    /// Delay between re-count attempts
    #[serde(with = "humantime_serde")]
    pub verify_delay: Duration,
}

impl Default for ClearConfig {
    fn default() -> Self {
        Self {
            declared_tables: [
                "PlayerTransaction",
                "PlayerResult",
                "PlayerEntry",
                "PlayerVenue",
                "PlayerSummary",
                "Player",
                "KnownPlayerIdentity",
                "GameCostLineItem",
                "GameCost",
                "GameFinancialSnapshot",
                "TournamentStructure",
                "Game",
                "RecurringGame",
                "TournamentSeries",
                "VenueDetails",
                "Venue",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            progress_interval: 500,
            verify_attempts: 3,
            verify_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Scraper bookkeeping tables, referencing tables before referenced ones
    pub tables: Vec<String>,
    /// Table holding references to cached objects; never cleared
    pub cache_table: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            tables: [
                "ScrapeAttempt",
                "ScraperJob",
                "ScrapeURL",
                "ScrapeStructure",
                "ScraperState",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            cache_table: "S3Storage".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct LogsConfig {
    /// Split a page of events into sidecars of at most this many events
    pub max_events_per_file: Option<usize>,
    /// Select groups containing this string instead of the environment suffix
    pub group_contains: Option<String>,
    /// Events requested per page
    pub page_limit: Option<i32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    pub aws: AwsConfig,
    pub environment: EnvironmentConfig,
    pub backup: BackupConfig,
    pub retry: RetryConfig,
    pub concurrency: ConcurrencyConfig,
    pub timeouts: TimeoutConfig,
    pub csv: CsvConfig,
    pub clear: ClearConfig,
    pub scraper: ScraperConfig,
    pub logs: LogsConfig,
}

impl Configuration {
    /// Load defaults, `datasweep.toml` and `DATASWEEP__` environment overrides.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Path::new(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("DATASWEEP__").split("__"))
    }

    /// Reject configurations that would be unsafe or meaningless to run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment.name.trim().is_empty() {
            return Err(ConfigError::EmptyEnvironment);
        }

        if let Some(region) = &self.aws.region {
            let valid = !region.is_empty()
                && region
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
            if !valid {
                return Err(ConfigError::InvalidRegion(region.clone()));
            }
        }

        check_table_list("clear.declared_tables", &self.clear.declared_tables)?;
        check_table_list("scraper.tables", &self.scraper.tables)?;

        if self.scraper.cache_table.trim().is_empty() {
            return Err(ConfigError::EmptyTableName {
                list: "scraper.cache_table",
            });
        }
        if self
            .scraper
            .tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&self.scraper.cache_table))
        {
            return Err(ConfigError::CacheTableNotExcluded(
                self.scraper.cache_table.clone(),
            ));
        }

        self.retry.default.validate("retry.default")?;
        self.retry.throttle.validate("retry.throttle")?;

        for (field, value) in [
            ("concurrency.table_workers", self.concurrency.table_workers),
            (
                "concurrency.chunk_concurrency",
                self.concurrency.chunk_concurrency,
            ),
            ("concurrency.group_workers", self.concurrency.group_workers),
            ("concurrency.stream_workers", self.concurrency.stream_workers),
        ] {
            if value == 0 {
                return Err(ConfigError::NotPositive { field });
            }
        }

        if self.clear.progress_interval == 0 {
            return Err(ConfigError::NotPositive {
                field: "clear.progress_interval",
            });
        }
        if self.timeouts.call_timeout.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "timeouts.call_timeout",
            });
        }
        if self.logs.max_events_per_file == Some(0) {
            return Err(ConfigError::NotPositive {
                field: "logs.max_events_per_file",
            });
        }

        if let Some(endpoint) = &self.aws.endpoint_url {
            check_url("aws.endpoint_url", endpoint, &["http", "https"])?;
        }
        if let Some(dsn) = &self.backup.mirror_dsn {
            check_url("backup.mirror_dsn", dsn, &["file", "memory", "s3"])?;
        }

        Ok(())
    }
}

fn check_url(field: &'static str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    match url::Url::parse(value) {
        Ok(url) if schemes.contains(&url.scheme()) => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}

fn check_table_list(list: &'static str, tables: &[String]) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for table in tables {
        if table.trim().is_empty() {
            return Err(ConfigError::EmptyTableName { list });
        }
        if !seen.insert(table.as_str()) {
            return Err(ConfigError::DuplicateTable {
                list,
                table: table.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_configuration_is_valid() {
        let config = Configuration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.environment.name, "dev");
        assert_eq!(config.scraper.cache_table, "S3Storage");
        assert_eq!(config.scraper.tables.len(), 5);
        assert_eq!(config.concurrency.table_workers, 4);
        assert_eq!(config.timeouts.call_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_configless_operation() {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .extract::<Configuration>()
            .unwrap();

        assert_eq!(config.backup.table_dir_prefix, "dbbackup");
        assert_eq!(config.backup.log_dir_prefix, "logbackup");
        assert!(config.csv.null_sentinel.is_none());
    }

    #[test]
    fn test_cache_table_in_scraper_list_is_rejected() {
        let mut config = Configuration::default();
        config.scraper.tables.push("S3Storage".to_string());

        assert_eq!(
            config.validate(),
            Err(ConfigError::CacheTableNotExcluded("S3Storage".to_string()))
        );
    }

    #[test]
    fn test_duplicate_declared_table_is_rejected() {
        let mut config = Configuration::default();
        config.clear.declared_tables = vec!["Game".into(), "Game".into()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateTable { .. })
        ));
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let mut config = Configuration::default();
        config.concurrency.table_workers = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotPositive {
                field: "concurrency.table_workers"
            })
        );
    }

    #[test]
    fn test_invalid_region_is_rejected() {
        let mut config = Configuration::default();
        config.aws.region = Some("US East".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRegion(_))
        ));
    }

    #[test]
    fn test_mirror_dsn_scheme_is_checked() {
        let mut config = Configuration::default();
        config.backup.mirror_dsn = Some("s3://backups/datasweep".to_string());
        assert!(config.validate().is_ok());

        config.backup.mirror_dsn = Some("ftp://backups".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl {
                field: "backup.mirror_dsn",
                ..
            })
        ));
    }

    #[test]
    fn test_toml_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "datasweep.toml",
                r#"
                [environment]
                name = "staging"
                api_prefix = "abc123"

                [timeouts]
                call_timeout = "5s"

                [scraper]
                tables = ["ScrapeAttempt", "ScrapeURL"]
                cache_table = "S3Storage"
                "#,
            )?;
            jail.set_env("DATASWEEP__CONCURRENCY__TABLE_WORKERS", "8");
            jail.set_env("DATASWEEP__CSV__NULL_SENTINEL", "NULL");

            let config = Configuration::load().expect("configuration loads");
            assert_eq!(config.environment.name, "staging");
            assert_eq!(config.environment.api_prefix.as_deref(), Some("abc123"));
            assert_eq!(config.timeouts.call_timeout, Duration::from_secs(5));
            assert_eq!(config.scraper.tables, vec!["ScrapeAttempt", "ScrapeURL"]);
            assert_eq!(config.concurrency.table_workers, 8);
            assert_eq!(config.csv.null_sentinel.as_deref(), Some("NULL"));
            assert!(config.validate().is_ok());
            Ok(())
        });
    }
}
