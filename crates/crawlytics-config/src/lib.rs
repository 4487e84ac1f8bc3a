// crawlytics-config - Runtime configuration for the crawlytics jobs
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from CRAWLYTICS_CONFIG env var
// 3. Config file contents from CRAWLYTICS_CONFIG_CONTENT env var
// 4. Default config file locations (./config.toml, ./.crawlytics.toml)
// 5. Built-in defaults (lowest priority)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logs: LogsConfig,

    #[serde(default)]
    pub cloudwatch: CloudWatchConfig,

    #[serde(default)]
    pub bidstream: BidstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Document store backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            fs: Some(FsConfig::default()),
            s3: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Fs,
    S3,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Fs => write!(f, "fs"),
            StorageBackend::S3 => write!(f, "s3"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageBackend::Memory),
            "fs" | "filesystem" => Ok(StorageBackend::Fs),
            "s3" | "aws" => Ok(StorageBackend::S3),
            _ => anyhow::bail!(
                "Unsupported storage backend: {}. Supported: memory, fs, s3",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    pub path: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            path: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Local crawler log directory (`info.log.<date>`, `error.log.<date>`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// CloudWatch Logs source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudWatchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Crawler log group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_group: Option<String>,
    /// Recommendation engine log group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adv_log_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bidstream_log_group: Option<String>,
    /// Maximum events per `FilterLogEvents` page
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    /// Bound on a single `FilterLogEvents` call
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
}

fn default_page_limit() -> u32 {
    10_000
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

impl CloudWatchConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for CloudWatchConfig {
    fn default() -> Self {
        Self {
            region: None,
            log_group: None,
            adv_log_group: None,
            bidstream_log_group: None,
            page_limit: default_page_limit(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// Bid-stream pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BidstreamConfig {
    /// Bounded queue between the fetcher and the consumers (in batches)
    pub queue_capacity: usize,
    pub consumers: usize,
    /// Hard ceiling on fetched pages per run
    pub max_pages: usize,
    pub fetch_timeout_secs: u64,
    /// Rolling window for the per-domain summary; 0 disables compaction
    pub aggregate_days: u32,
    pub top_geos: usize,
}

impl BidstreamConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for BidstreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            consumers: 1,
            max_pages: 100,
            fetch_timeout_secs: 30,
            aggregate_days: 28,
            top_geos: 5,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Load configuration from an explicit file (CLI `--config`), then apply
    /// environment overrides.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    /// Parse TOML content on top of the defaults, without environment
    /// overrides.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config = RuntimeConfig::default();
        let file_config: RuntimeConfig =
            toml::from_str(content).context("Failed to parse config content")?;
        config.merge(file_config);
        config.validate()?;
        Ok(config)
    }

    /// Merge a file-provided configuration into this one.
    pub fn merge(&mut self, other: RuntimeConfig) {
        self.logging = other.logging;
        self.storage = other.storage;
        self.bidstream = other.bidstream;
        self.cloudwatch = other.cloudwatch;

        if other.logs.path.is_some() {
            self.logs = other.logs;
        }
    }

    /// Apply environment overrides from a custom source.
    pub fn apply_env_overrides_from<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        env_overrides::apply_env_overrides(self, env)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}
