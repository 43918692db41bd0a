//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::storage::{QueryOptions, ShardMerge};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// How shard results are combined
    #[serde(default)]
    pub shard_merge: ShardMerge,

    /// Fan `select` out to shards and blocks on the rayon pool
    #[serde(default)]
    pub parallel_select: bool,

    /// Samples kept behind the head by lookback iterators
    #[serde(default = "default_lookback_samples")]
    pub lookback_samples: usize,
}

fn default_lookback_samples() -> usize {
    16
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            shard_merge: ShardMerge::default(),
            parallel_select: false,
            lookback_samples: default_lookback_samples(),
        }
    }
}

impl From<&QueryConfig> for QueryOptions {
    fn from(config: &QueryConfig) -> Self {
        QueryOptions {
            shard_merge: config.shard_merge,
            parallel_select: config.parallel_select,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        // Try default config locations
        let config_paths = [
            dirs::config_dir().map(|p| p.join("chronicle-tsdb").join("config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Options for opening queriers
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions::from(&self.query)
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Query overrides
        if let Some(mode) = var("CHRONICLE_SHARD_MERGE") {
            match mode.parse() {
                Ok(mode) => self.query.shard_merge = mode,
                Err(e) => tracing::warn!("Ignoring CHRONICLE_SHARD_MERGE: {}", e),
            }
        }
        if let Some(parallel) = var("CHRONICLE_PARALLEL_SELECT") {
            if let Ok(p) = parallel.parse() {
                self.query.parallel_select = p;
            }
        }
        if let Some(lookback) = var("CHRONICLE_LOOKBACK_SAMPLES") {
            if let Ok(n) = lookback.parse() {
                self.query.lookback_samples = n;
            }
        }

        // Logging overrides
        if let Some(level) = var("CHRONICLE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("CHRONICLE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# chronicle-tsdb Configuration
#
# Environment variables override these settings:
# - CHRONICLE_SHARD_MERGE
# - CHRONICLE_PARALLEL_SELECT
# - CHRONICLE_LOOKBACK_SAMPLES
# - CHRONICLE_LOG_LEVEL
# - CHRONICLE_LOG_FORMAT

[query]
# How results from different shards are combined:
#   merge  - sorted merge; series present in several shards are joined
#   concat - shard after shard; only correct if shards never share a series
shard_merge = "merge"

# Run select across shards and blocks on a thread pool
parallel_select = false

# Samples remembered behind the current one for rate calculations
lookback_samples = 16

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/chronicle-tsdb/query.log"
"#
    .to_string()
}
