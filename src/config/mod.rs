//! Application configuration.
//!
//! One explicit struct passed into the driver, loaded from YAML files and
//! environment variables.

mod paths;

pub use paths::{StoragePaths, TempPaths};

use std::path::PathBuf;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "batchlayer.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "BATCHLAYER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BATCHLAYER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "BATCHLAYER_LOG";

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store locations.
    pub storage: StorageConfig,
    /// Aggregation job settings.
    pub job: JobConfig,
    /// Ingestion retry settings.
    pub ingest: IngestConfig,
}

/// Storage back end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Local filesystem.
    #[default]
    Local,
    /// Distributed filesystem mounted at `root`. Stores only need rename,
    /// hard link and directory listing from it.
    Distributed,
}

/// Store locations. Relative paths are resolved against `root`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    pub root: PathBuf,
    pub new_data_path: PathBuf,
    pub master_path: PathBuf,
    pub temp_path: PathBuf,
    pub results_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Local,
            root: PathBuf::from("/tmp/swa"),
            new_data_path: PathBuf::from("newData"),
            master_path: PathBuf::from("master"),
            temp_path: PathBuf::from("tmp"),
            results_path: PathBuf::from("outputs"),
        }
    }
}

impl StorageConfig {
    /// Absolute store locations.
    pub fn paths(&self) -> StoragePaths {
        let resolve = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                self.root.join(p)
            }
        };
        StoragePaths {
            new_data: resolve(&self.new_data_path),
            master: resolve(&self.master_path),
            temp: resolve(&self.temp_path),
            results: resolve(&self.results_path),
        }
    }
}

/// Aggregation job settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Reduce partitions.
    pub reducers: usize,
    /// Concurrent map tasks.
    pub map_workers: usize,
    /// Largest tolerated fraction of undecodable records before a run fails.
    pub skip_ratio_threshold: f64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            reducers: 3,
            map_workers: 4,
            skip_ratio_threshold: 0.01,
        }
    }
}

/// Ingestion retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Attempts per cycle, including the first.
    pub max_attempts: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `batchlayer.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `BATCHLAYER_CONFIG` environment variable (if set)
    /// 4. Environment variables with `BATCHLAYER__` prefix, `__` separated
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document. Missing fields take their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Config rooted at `root`, for tests and tools.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                root: root.into(),
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job.reducers == 0 {
            return Err(ConfigError::Invalid("job.reducers must be at least 1".into()));
        }
        if self.job.map_workers == 0 {
            return Err(ConfigError::Invalid("job.map_workers must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.job.skip_ratio_threshold) {
            return Err(ConfigError::Invalid(format!(
                "job.skip_ratio_threshold must be within [0, 1], got {}",
                self.job.skip_ratio_threshold
            )));
        }
        if self.ingest.max_attempts == 0 {
            return Err(ConfigError::Invalid("ingest.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}
