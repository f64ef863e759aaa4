//! Savepoint Library
//!
//! Keeps an immutable, timestamped copy of a file every time it is saved, in
//! a backup tree that mirrors the source filesystem, with retention and
//! read-only browsing over that history.

pub mod archive;
pub mod browser;
pub mod catalog;
pub mod clock;
pub mod compress;
pub mod config;
pub mod executor;
pub mod fs;
pub mod retention;
pub mod service;
pub mod source;
pub mod utils;

// Re-export commonly used types
pub use archive::{ArchiveOutcome, PathFilter, SkipReason};
pub use catalog::BackupEntry;
pub use config::Config;
pub use service::{BackupService, SaveReport};
pub use source::{RemoteDescriptor, SourceFile};
pub use utils::errors::SavepointError;
pub type Result<T> = std::result::Result<T, SavepointError>;
