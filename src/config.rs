use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::command::CommandSpec;
use crate::error::HarvestError;
use crate::fetcher::FetcherKind;
use crate::imaging::DEFAULT_THUMBNAIL_MAX;

pub const DEFAULT_CONFIG_FILE: &str = "harvest.json";
pub const PROFILES_ENV: &str = "HARVEST_PROFILES";
pub const PHOTOS_ENV: &str = "HARVEST_PHOTOS";

/// On-disk configuration. Every key is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub profiles_dir: Option<String>,
    #[serde(default)]
    pub photos_dir: Option<String>,
    #[serde(default)]
    pub encounters_command: Option<CommandSpec>,
    #[serde(default)]
    pub dislike_command: Option<CommandSpec>,
    #[serde(default)]
    pub fetcher: Option<FetcherKind>,
    #[serde(default)]
    pub curl_command: Option<CommandSpec>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub thumbnail_max: Option<u32>,
    #[serde(default)]
    pub requests_per_second: Option<f64>,
    #[serde(default)]
    pub burst: Option<u32>,
    #[serde(default)]
    pub pages_per_minute: Option<f64>,
    #[serde(default)]
    pub backoff_initial_secs: Option<u64>,
    #[serde(default)]
    pub backoff_max_secs: Option<u64>,
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub profiles_dir: Utf8PathBuf,
    pub photos_dir: Utf8PathBuf,
    pub encounters_command: CommandSpec,
    pub dislike_command: CommandSpec,
    pub fetcher: FetcherKind,
    pub curl_command: CommandSpec,
    pub http_timeout: Duration,
    pub thumbnail_max: u32,
    /// `None` disables photo fetch pacing.
    pub requests_per_second: Option<f64>,
    pub burst: u32,
    /// `None` polls encounter pages back to back.
    pub pages_per_minute: Option<f64>,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub max_consecutive_failures: Option<u32>,
}

impl ResolvedConfig {
    /// Environment overrides for the store directories.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(PROFILES_ENV).filter(|value| !value.trim().is_empty()) {
            self.profiles_dir = Utf8PathBuf::from(dir);
        }
        if let Some(dir) = lookup(PHOTOS_ENV).filter(|value| !value.trim().is_empty()) {
            self.photos_dir = Utf8PathBuf::from(dir);
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `harvest.json` in the working directory when present,
    /// then applies the environment.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config = Self::load(path)?;
        let mut resolved = Self::resolve_config(config)?;
        resolved.apply_env(|key| std::env::var(key).ok());
        Ok(resolved)
    }

    pub fn load(path: Option<&str>) -> Result<Config, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| HarvestError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarvestError> {
        let thumbnail_max = config.thumbnail_max.unwrap_or(DEFAULT_THUMBNAIL_MAX);
        if thumbnail_max == 0 {
            return Err(HarvestError::ConfigValue(
                "thumbnail_max must be positive".to_string(),
            ));
        }

        let requests_per_second = match config.requests_per_second {
            Some(rate) if !(rate.is_finite() && rate >= 0.0) => {
                return Err(HarvestError::ConfigValue(format!(
                    "requests_per_second must be a non-negative number, got {rate}"
                )));
            }
            Some(rate) if rate == 0.0 => None,
            Some(rate) => Some(rate),
            None => Some(default_requests_per_second()),
        };

        let pages_per_minute = match config.pages_per_minute {
            Some(rate) if !(rate.is_finite() && rate > 0.0) => {
                return Err(HarvestError::ConfigValue(format!(
                    "pages_per_minute must be positive, got {rate}"
                )));
            }
            other => other,
        };

        let backoff_initial = Duration::from_secs(config.backoff_initial_secs.unwrap_or(60));
        let backoff_max = Duration::from_secs(config.backoff_max_secs.unwrap_or(15 * 60));
        if backoff_max < backoff_initial {
            return Err(HarvestError::ConfigValue(
                "backoff_max_secs is smaller than backoff_initial_secs".to_string(),
            ));
        }

        if config.max_consecutive_failures == Some(0) {
            return Err(HarvestError::ConfigValue(
                "max_consecutive_failures must be positive".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            profiles_dir: config
                .profiles_dir
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| Utf8PathBuf::from("profiles")),
            photos_dir: config
                .photos_dir
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| Utf8PathBuf::from("photos")),
            encounters_command: config
                .encounters_command
                .unwrap_or_else(|| CommandSpec::new("./commands/encounters.sh", &[])),
            dislike_command: config
                .dislike_command
                .unwrap_or_else(|| CommandSpec::new("./commands/dislike.sh", &[])),
            fetcher: config.fetcher.unwrap_or_default(),
            curl_command: config
                .curl_command
                .unwrap_or_else(|| CommandSpec::new("curl", &[])),
            http_timeout: Duration::from_secs(config.http_timeout_secs.unwrap_or(30).max(1)),
            thumbnail_max,
            requests_per_second,
            burst: config.burst.unwrap_or(4).max(1),
            pages_per_minute,
            backoff_initial,
            backoff_max,
            max_consecutive_failures: config.max_consecutive_failures,
        })
    }
}

pub fn default_requests_per_second() -> f64 {
    2.0
}
