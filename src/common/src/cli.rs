use std::path::PathBuf;

use clap::Args;

/// Common CLI arguments shared by every datasweep command
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Default log filter for the given CLI flags
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments; `RUST_LOG` wins when set.
    ///
    /// Logs go to standard error so plans and summaries stay readable.
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::utils::log_level;
    use super::*;

    #[test]
    fn test_log_level_from_flags() {
        assert_eq!(log_level(&CommonArgs::default()), "info");
        assert_eq!(
            log_level(&CommonArgs {
                verbose: true,
                ..Default::default()
            }),
            "debug"
        );
        assert_eq!(
            log_level(&CommonArgs {
                quiet: true,
                verbose: true,
                ..Default::default()
            }),
            "warn"
        );
    }
}
