use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, utils};
use common::error::exit_code_for;
use common::{CancelToken, ConfigError, Configuration, SweepError};
use orchestrator::{Confirmer, Orchestrator, RunReport, Services};

#[derive(Parser, Debug)]
#[command(name = "datasweep")]
#[command(about = "Back up, clear and archive the tables and log groups of one environment")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, global = true, help = "Skip every confirmation prompt")]
    auto: bool,

    #[arg(long, global = true, help = "Print the plans without writing or deleting anything")]
    dry_run: bool,

    #[arg(long, global = true, env = "DATASWEEP_ENV", help = "Environment suffix of tables and log groups")]
    env: Option<String>,

    #[arg(long, global = true, help = "Only tables whose name contains this string")]
    api_prefix: Option<String>,

    #[arg(long, global = true, help = "Directory the backup directories are created in")]
    backup_root: Option<PathBuf>,

    #[arg(long, global = true, help = "Service region")]
    region: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Snapshot every table of the environment to CSV
    Export,
    /// Delete every item of the declared tables
    Clear,
    /// Delete every item of the scraper bookkeeping tables
    ClearScraper,
    /// Archive log groups to JSON sidecars, then delete them
    ArchiveLogs,
    /// Export, clear, clear-scraper and archive-logs in sequence
    Run,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Configuration) {
        if let Some(env) = &self.env {
            config.environment.name = env.clone();
        }
        if let Some(prefix) = &self.api_prefix {
            config.environment.api_prefix = Some(prefix.clone());
        }
        if let Some(root) = &self.backup_root {
            config.backup.root = Some(root.clone());
        }
        if let Some(region) = &self.region {
            config.aws.region = Some(region.clone());
        }
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => tracing::warn!("Received SIGINT"),
            _ = sigterm.recv() => tracing::warn!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        tracing::warn!("Received Ctrl+C");
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<RunReport> {
    let mut config = utils::load_config(cli.common.config.as_ref())
        .map_err(|e| SweepError::Configuration(ConfigError::Load(format!("{e:#}"))))?;
    cli.apply_overrides(&mut config);
    config.validate().map_err(SweepError::from)?;

    let confirmer = if cli.auto {
        Confirmer::auto()
    } else {
        Confirmer::stdin()
    };
    let services = Services::aws(&config.aws).await;
    let cancel = CancelToken::new();
    let orchestrator = Orchestrator::new(config, services, confirmer, cli.dry_run)
        .context("Failed to prepare run")?
        .with_cancel(cancel.clone());

    let signals = tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {
                tracing::warn!("Cancelling run, in-flight work is winding down");
                cancel.cancel();
            }
            Err(e) => tracing::error!("Signal handling unavailable: {e:#}"),
        }
    });

    let report = match cli.command {
        Command::Export => orchestrator.export_all().await,
        Command::Clear => orchestrator.clear_declared().await,
        Command::ClearScraper => orchestrator.clear_scraper_meta().await,
        Command::ArchiveLogs => orchestrator.archive_and_delete_logs().await,
        Command::Run => orchestrator.run_all().await,
    };

    signals.abort();
    Ok(report)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; plans and the summary are printed there too
    utils::init_logging(&cli.common);

    let code = match run(cli).await {
        Ok(report) => {
            eprint!("{report}");
            report.exit_code()
        }
        Err(err) => {
            eprintln!("error: {err}");
            for cause in err.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            exit_code_for(&err)
        }
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_configuration() {
        let cli = Cli::try_parse_from([
            "datasweep",
            "run",
            "--auto",
            "--env",
            "staging",
            "--api-prefix",
            "abc123",
            "--backup-root",
            "/backups",
            "--region",
            "eu-west-1",
        ])
        .unwrap();
        assert!(cli.auto);
        assert!(matches!(cli.command, Command::Run));

        let mut config = Configuration::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.environment.name, "staging");
        assert_eq!(config.environment.api_prefix.as_deref(), Some("abc123"));
        assert_eq!(config.backup.root, Some(PathBuf::from("/backups")));
        assert_eq!(config.aws.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_subcommand_names() {
        for name in ["export", "clear", "clear-scraper", "archive-logs", "run"] {
            assert!(Cli::try_parse_from(["datasweep", name, "--dry-run"]).is_ok());
        }
    }
}
