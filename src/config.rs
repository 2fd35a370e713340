//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `TERRACE_*` environment overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Hot and durable tier configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Number of shards this node owns
    #[serde(default = "default_shards")]
    pub shards: u32,

    /// Write-back channel capacity (requests in flight)
    #[serde(default = "default_writeback_capacity")]
    pub writeback_capacity: usize,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("terrace").to_string_lossy().to_string())
        .unwrap_or_else(|| "./terrace_data".to_string())
}

fn default_shards() -> u32 {
    4
}

fn default_writeback_capacity() -> usize {
    1024
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            shards: default_shards(),
            writeback_capacity: default_writeback_capacity(),
        }
    }
}

impl StoreConfig {
    /// Durable tier database path for one shard
    pub fn durable_path(&self, shard: u32) -> PathBuf {
        PathBuf::from(&self.data_dir)
            .join("durable")
            .join(format!("shard_{}.db", shard))
    }

    /// Warm-restart snapshot path for one shard
    pub fn snapshot_path(&self, shard: u32) -> PathBuf {
        PathBuf::from(&self.data_dir)
            .join("snapshots")
            .join(format!("shard_{}.snap", shard))
    }
}

/// Freeze-and-ship sweep configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Age after which an accumulator is frozen and shipped (ms)
    #[serde(default = "default_hot_window")]
    pub hot_window_ms: i64,

    /// Fixed sweep period (ms)
    #[serde(default = "default_sweep_period")]
    pub period_ms: u64,
}

fn default_hot_window() -> i64 {
    120_000 // 2 minutes
}

fn default_sweep_period() -> u64 {
    10_000 // 10 seconds
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            hot_window_ms: default_hot_window(),
            period_ms: default_sweep_period(),
        }
    }
}

/// Hourly checkpoint archival configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    /// Local staging directory for checkpoint files
    #[serde(default = "default_checkpoint_dir")]
    pub staging_dir: String,

    /// Hours still inside the live admission window, never checkpointed
    #[serde(default = "default_admission_window")]
    pub admission_window_hours: i64,
}

fn default_checkpoint_dir() -> String {
    "./terrace_checkpoints".to_string()
}

fn default_admission_window() -> i64 {
    2
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_checkpoint_dir(),
            admission_window_hours: default_admission_window(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` for development, `json` for production
    #[serde(default = "default_log_format")]
    pub format: String,
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

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("terrace").join("config.toml")),
            Some(PathBuf::from("/etc/terrace/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(data_dir) = std::env::var("TERRACE_DATA_DIR") {
            self.store.data_dir = data_dir;
        }
        if let Ok(shards) = std::env::var("TERRACE_SHARDS") {
            if let Ok(n) = shards.parse() {
                self.store.shards = n;
            }
        }
        if let Ok(window) = std::env::var("TERRACE_HOT_WINDOW_MS") {
            if let Ok(ms) = window.parse() {
                self.sweep.hot_window_ms = ms;
            }
        }
        if let Ok(dir) = std::env::var("TERRACE_CHECKPOINT_DIR") {
            self.checkpoint.staging_dir = dir;
        }
        if let Ok(level) = std::env::var("TERRACE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TERRACE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Initialize the global tracing subscriber from a [`LoggingConfig`]
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("terrace={}", config.level)),
    );

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
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
    r#"# Terrace Configuration
#
# Environment variables override these settings:
# - TERRACE_DATA_DIR
# - TERRACE_SHARDS
# - TERRACE_HOT_WINDOW_MS
# - TERRACE_CHECKPOINT_DIR
# - TERRACE_LOG_LEVEL
# - TERRACE_LOG_FORMAT

[store]
# Directory for durable tier databases and snapshots
data_dir = "~/.local/share/terrace"

# Number of shards this node owns
shards = 4

# Write-back channel capacity (frozen accumulators in flight)
writeback_capacity = 1024

[sweep]
# Age after which a hot accumulator is frozen and shipped (ms)
hot_window_ms = 120000

# Sweep period (ms)
period_ms = 10000

[checkpoint]
# Local staging directory for hourly checkpoint files
staging_dir = "./terrace_checkpoints"

# Hours still accepting late samples, never checkpointed
admission_window_hours = 2

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.shards, 4);
        assert_eq!(config.sweep.hot_window_ms, 120_000);
        assert_eq!(config.checkpoint.admission_window_hours, 2);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_generated_config_parses() {
        let content = generate_default_config();
        let config: Config = toml::from_str(&content).unwrap();
        assert_eq!(config.store.writeback_capacity, 1024);
        assert_eq!(config.sweep.period_ms, 10_000);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[sweep]\nhot_window_ms = 5000\n").unwrap();
        assert_eq!(config.sweep.hot_window_ms, 5_000);
        assert_eq!(config.sweep.period_ms, 10_000);
        assert_eq!(config.store.shards, 4);
    }

    #[test]
    fn test_shard_paths() {
        let store = StoreConfig {
            data_dir: "/tmp/terrace".into(),
            ..Default::default()
        };
        assert_eq!(
            store.durable_path(2),
            PathBuf::from("/tmp/terrace/durable/shard_2.db")
        );
        assert_eq!(
            store.snapshot_path(0),
            PathBuf::from("/tmp/terrace/snapshots/shard_0.snap")
        );
    }
}
