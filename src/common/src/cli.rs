use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Configuration;

/// Common CLI arguments
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Flags overriding configuration values (highest precedence)
#[derive(Args, Debug, Clone, Default)]
pub struct DrainArgs {
    #[arg(long, help = "DSN of the bucket where logs are stored")]
    pub store: Option<String>,

    #[arg(long, help = "AWS profile to be used")]
    pub profile: Option<String>,

    #[arg(long, help = "Folder to store processed logs")]
    pub archive_root: Option<PathBuf>,

    #[arg(long, help = "Number of items to process per batch")]
    pub batch_size: Option<usize>,

    #[arg(
        long,
        help = "Process data up to this UTC day (excluded), format YYYY-MM-DD"
    )]
    pub day_until: Option<NaiveDate>,

    #[arg(long, help = "Report what would be imported without changing anything")]
    pub dry_run: bool,

    #[arg(
        long,
        value_parser = parse_duration,
        help = "Repeat the drain with this pause between runs (e.g. 15m)"
    )]
    pub watch: Option<Duration>,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

impl DrainArgs {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut Configuration) {
        if let Some(store) = &self.store {
            config.store.dsn = store.clone();
        }
        if let Some(profile) = &self.profile {
            config.store.profile = Some(profile.clone());
        }
        if let Some(root) = &self.archive_root {
            config.archive.root = root.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.drain.batch_size = batch_size;
        }
        if let Some(day_until) = self.day_until {
            config.drain.day_until = Some(day_until);
        }
        if self.dry_run {
            config.drain.dry_run = true;
        }
        if let Some(interval) = self.watch {
            config.drain.watch_interval = Some(interval);
        }
    }
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, Default)]
pub enum CommonCommands {
    /// Drain the bucket (default behavior)
    #[default]
    Start,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::{self, APP_NAME};
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Initialize logging based on CLI arguments; `RUST_LOG` takes precedence
    pub fn init_logging(args: &CommonArgs) {
        let level = if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                tracing::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("{APP_NAME} configuration:");
            println!("======================");
            println!("Store DSN: {}", config.store.dsn);
            println!("Store region: {}", config.store.region);
            match &config.store.profile {
                Some(profile) => println!("AWS profile: {profile}"),
                None => println!("AWS profile: none (AWS_* environment)"),
            }
            println!("Archive root: {}", config.archive.root.display());
            println!("Batch size: {}", config.drain.batch_size);
            match config.drain.day_until {
                Some(day) => println!("Day until: {day} (excluded)"),
                None => println!("Day until: two hours before now, UTC (excluded)"),
            }
            println!("Dry run: {}", config.drain.dry_run);
            match config.drain.watch_interval {
                Some(interval) => println!(
                    "Watch interval: {}",
                    humantime_serde::re::humantime::format_duration(interval)
                ),
                None => println!("Watch interval: none (single run)"),
            }
            println!();
            println!("Config search order (lowest to highest before env/flags):");
            for path in config::default_config_paths() {
                println!("  {}", path.display());
            }
            println!("Precedence: defaults < config file < environment < flags");
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration, today: NaiveDate) -> Result<()> {
        tracing::info!("Validating configuration...");
        config.validate(today).context("Invalid configuration")?;
        tracing::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle commands that don't run the drain
    pub fn handle_common_command(
        command: &CommonCommands,
        config: &Configuration,
        today: NaiveDate,
    ) -> Result<bool> {
        match command {
            CommonCommands::Config { json } => {
                display_config(config, *json)?;
                Ok(true)
            }
            CommonCommands::Validate => {
                validate_config(config, today)?;
                Ok(true)
            }
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(true)
            }
            CommonCommands::Start => Ok(false),
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            APP_NAME,
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
