use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

pub const APP_NAME: &str = "logdrain";

/// Prefix of environment overrides, e.g. `LOGDRAIN__DRAIN__BATCH_SIZE`.
pub const ENV_PREFIX: &str = "LOGDRAIN__";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// DSN of the bucket holding the log objects.
    ///
    /// `s3://[access_key:secret_key@]host[:port]/bucket`, `file:///path` or
    /// `memory://`.
    ///
    /// Env: LOGDRAIN__STORE__DSN
    pub dsn: String,

    /// Region used for S3 when `AWS_DEFAULT_REGION` is not set.
    ///
    /// Env: LOGDRAIN__STORE__REGION
    pub region: String,

    /// Shared AWS config profile supplying S3 credentials and region.
    /// Unset means the standard `AWS_*` environment (or DSN credentials).
    ///
    /// Env: LOGDRAIN__STORE__PROFILE
    #[serde(default)]
    pub profile: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            region: "us-east-1".to_string(),
            profile: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ArchiveConfig {
    /// Directory under which day partitions are written.
    ///
    /// Env: LOGDRAIN__ARCHIVE__ROOT
    pub root: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DrainConfig {
    /// Maximum number of objects listed per batch.
    ///
    /// Env: LOGDRAIN__DRAIN__BATCH_SIZE
    pub batch_size: usize,

    /// Process objects up to this UTC day, excluded. Defaults to the UTC day
    /// of two hours ago, evaluated at the start of every run.
    ///
    /// Env: LOGDRAIN__DRAIN__DAY_UNTIL
    #[serde(default)]
    pub day_until: Option<NaiveDate>,

    /// Report what would be imported without touching anything.
    ///
    /// Env: LOGDRAIN__DRAIN__DRY_RUN
    #[serde(default)]
    pub dry_run: bool,

    /// Repeat the drain with this pause between runs until interrupted.
    ///
    /// Env: LOGDRAIN__DRAIN__WATCH_INTERVAL
    #[serde(default, with = "humantime_serde")]
    pub watch_interval: Option<Duration>,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            day_until: None,
            dry_run: false,
            watch_interval: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Remote bucket the logs are drained from
    pub store: StoreConfig,
    /// Local day-partitioned archive
    pub archive: ArchiveConfig,
    /// Drain loop settings
    pub drain: DrainConfig,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    #[error("invalid batch-size: must be > 0")]
    InvalidBatchSize,

    #[error("day-until {day_until} is after today ({today}); it needs to be in the past or now")]
    DayUntilInFuture {
        day_until: NaiveDate,
        today: NaiveDate,
    },
}

/// `$XDG_CONFIG_HOME`, falling back to `~/.config`.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")),
    }
}

/// Configuration files searched when none is given explicitly, lowest
/// precedence first.
pub fn default_config_paths() -> Vec<PathBuf> {
    let file_name = format!("{APP_NAME}.toml");
    let mut paths = vec![Path::new("/etc").join(APP_NAME).join(&file_name)];
    if let Some(dir) = user_config_dir() {
        paths.push(dir.join(&file_name));
    }
    paths
}

impl Configuration {
    /// Layered provider: defaults < config file(s) < environment.
    ///
    /// With `config_file` set only that file is read; otherwise
    /// [`default_config_paths`] are merged in order. Missing files are
    /// skipped.
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Configuration::default()));

        match config_file {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                for path in default_config_paths() {
                    figment = figment.merge(Toml::file(path));
                }
            }
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(None).extract().map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Some(path)).extract().map_err(Box::new)
    }

    /// Check the settings the drain relies on, with `today` as the current
    /// UTC day.
    pub fn validate(&self, today: NaiveDate) -> Result<(), ConfigError> {
        if self.drain.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.store.dsn.trim().is_empty() {
            return Err(ConfigError::Missing("store.dsn"));
        }
        if self.archive.root.as_os_str().is_empty() {
            return Err(ConfigError::Missing("archive.root"));
        }
        if matches!(&self.store.profile, Some(profile) if profile.trim().is_empty()) {
            return Err(ConfigError::Missing("store.profile"));
        }
        match self.drain.day_until {
            Some(day_until) if day_until > today => {
                Err(ConfigError::DayUntilInFuture { day_until, today })
            }
            _ => Ok(()),
        }
    }
}
