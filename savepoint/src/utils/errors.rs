//! Custom error types for savepoint.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SavepointError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No backups found: {0}")]
    NotFound(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SavepointError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        SavepointError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Process exit code used by the CLI for this error class
    pub fn exit_code(&self) -> u8 {
        match self {
            SavepointError::Config(_) | SavepointError::InvalidSource(_) => 2,
            SavepointError::NotFound(_) => 3,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, SavepointError>;
