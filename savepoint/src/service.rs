//! The save pipeline: archive, then optionally apply retention.
//!
//! [`BackupService`] wires every component from one [`Config`] snapshot, so
//! behaviour never depends on process-wide state.

use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::archive::{ArchiveOutcome, ArchivePolicy, Archiver, ExcludeFilter, PathFilter};
use crate::browser::Browser;
use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::compress::Compressor;
use crate::config::Config;
use crate::fs::mapper::{Location, PathMapper};
use crate::retention::{Retention, RetentionReport};
use crate::source::{current_user, SourceFile};
use crate::utils::Result;

/// What one save event did
#[derive(Debug)]
pub struct SaveReport {
    pub outcome: ArchiveOutcome,
    /// Present when automatic cleanup ran after the archive
    pub cleanup: Option<RetentionReport>,
}

pub struct BackupService {
    mapper: Arc<PathMapper>,
    archiver: Archiver,
    catalog: Catalog,
    retention: Retention,
    browser: Browser,
    keep_count: usize,
    auto_cleanup: bool,
}

impl BackupService {
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let filter: Arc<dyn PathFilter> = Arc::new(ExcludeFilter::new(config.backup.exclude.clone()));
        Self::build(config, clock, filter)
    }

    /// Build with a host-supplied path filter instead of the configured
    /// exclude patterns
    pub fn with_filter(config: &Config, clock: Arc<dyn Clock>, filter: Arc<dyn PathFilter>) -> Result<Self> {
        Self::build(config, clock, filter)
    }

    fn build(config: &Config, clock: Arc<dyn Clock>, filter: Arc<dyn PathFilter>) -> Result<Self> {
        config.validate()?;
        let backup = &config.backup;

        let mapper = Arc::new(PathMapper::new(backup.root.clone(), current_user(), clock));
        let compressor = Compressor::new(backup.compression, backup.compression_level);
        let policy = ArchivePolicy {
            backup_remote_files: backup.backup_remote_files,
            size_limit: backup.size_limit.filter(|&limit| limit > 0),
            filter,
        };
        let catalog = Catalog::new(mapper.clone());

        Ok(Self {
            archiver: Archiver::new(mapper.clone(), compressor, policy),
            retention: Retention::new(catalog.clone()),
            browser: Browser::new(catalog.clone(), config.browser.show_header),
            catalog,
            mapper,
            keep_count: backup.keep_count,
            auto_cleanup: backup.auto_cleanup,
        })
    }

    pub fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn retention(&self) -> &Retention {
        &self.retention
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Root of the mirrored backup tree
    pub fn root(&self) -> &Path {
        self.mapper.root()
    }

    pub fn keep_count(&self) -> usize {
        self.keep_count
    }

    /// Where versions of `source` are stored, without creating anything
    pub fn location(&self, source: &SourceFile) -> Result<Location> {
        self.mapper.resolve(source, false)
    }

    /// Handle a save of `source` whose new content is `content`
    pub fn on_save(&self, source: &SourceFile, content: &[u8]) -> Result<SaveReport> {
        let outcome = self.archiver.archive(source, content)?;
        Ok(self.after_archive(source, outcome))
    }

    /// Handle a save of `source` by reading its content from `path`
    pub fn save_file(&self, source: &SourceFile, path: &Path) -> Result<SaveReport> {
        let outcome = self.archiver.archive_file(source, path)?;
        Ok(self.after_archive(source, outcome))
    }

    fn after_archive(&self, source: &SourceFile, outcome: ArchiveOutcome) -> SaveReport {
        let cleanup = match (&outcome, self.auto_cleanup) {
            (ArchiveOutcome::Archived(_), true) => {
                match self.retention.retain(source, self.keep_count) {
                    Ok(report) => Some(report),
                    Err(e) => {
                        // The backup itself succeeded; a failed cleanup does not undo it
                        warn!(source = %source, error = %e, "Automatic cleanup failed");
                        None
                    }
                }
            }
            _ => None,
        };
        SaveReport { outcome, cleanup }
    }
}
