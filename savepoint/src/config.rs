//! Configuration management for savepoint.
//!
//! Loads configuration from an optional TOML file with environment variable
//! overrides (`SAVEPOINT_BACKUP__KEEP_COUNT=5` sets `backup.keep_count`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::compress::Compression;
use crate::utils::{Result, SavepointError};

const ENV_PREFIX: &str = "SAVEPOINT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Root of the mirrored backup tree
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Archive files reached through a remote access method
    #[serde(default = "default_true")]
    pub backup_remote_files: bool,

    /// Paths containing any of these substrings are never backed up
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Files larger than this many bytes are skipped; 0 disables the limit
    #[serde(default = "default_size_limit")]
    pub size_limit: Option<u64>,

    /// Versions kept per file by cleanup
    #[serde(default = "default_keep_count")]
    pub keep_count: usize,

    /// Run cleanup after every backup
    #[serde(default)]
    pub auto_cleanup: bool,

    /// Compression scheme (none, gzip, bzip2, lzma, xz, zstd)
    #[serde(default)]
    pub compression: Compression,

    /// Encoder level, clamped to what the scheme supports
    #[serde(default)]
    pub compression_level: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Prefix opened backups with a line naming the file and version
    #[serde(default = "default_true")]
    pub show_header: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum backups running at once when archiving a directory
    #[serde(default = "default_max_concurrent_backups")]
    pub max_concurrent_backups: usize,
}

// Default values
fn default_root() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".backups"))
        .unwrap_or_else(|| PathBuf::from(".backups"))
}

fn default_true() -> bool {
    true
}

fn default_size_limit() -> Option<u64> {
    Some(5 * 1024 * 1024) // 5MB
}

fn default_keep_count() -> usize {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_concurrent_backups() -> usize {
    4
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            backup_remote_files: default_true(),
            exclude: Vec::new(),
            size_limit: default_size_limit(),
            keep_count: default_keep_count(),
            auto_cleanup: false,
            compression: Compression::default(),
            compression_level: None,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            show_header: default_true(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_backups: default_max_concurrent_backups(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file plus `SAVEPOINT_*`
    /// environment variables, then validate it
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            if !path.is_file() {
                return Err(SavepointError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("backup.exclude"),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SavepointError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| SavepointError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SavepointError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let root = &self.backup.root;
        if root.as_os_str().is_empty() {
            return Err(SavepointError::Config("backup.root must not be empty".into()));
        }
        if !root.is_absolute() {
            return Err(SavepointError::Config(format!(
                "backup.root must be an absolute path, got {}",
                root.display()
            )));
        }
        if root.exists() && !root.is_dir() {
            return Err(SavepointError::Config(format!(
                "backup.root {} is not a directory",
                root.display()
            )));
        }
        if self.performance.max_concurrent_backups == 0 {
            return Err(SavepointError::Config(
                "performance.max_concurrent_backups must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
