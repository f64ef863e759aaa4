//! Keeping only the most recent versions of a source file.

use std::fs;
use tracing::{info, warn};

use crate::catalog::{BackupEntry, Catalog};
use crate::source::SourceFile;
use crate::utils::Result;

/// An entry that could not be deleted
#[derive(Debug)]
pub struct RetentionFailure {
    pub entry: BackupEntry,
    pub error: std::io::Error,
}

/// Aggregate result of one retention pass
#[derive(Debug, Default)]
pub struct RetentionReport {
    /// Entries left in place
    pub kept: usize,
    /// Entries deleted
    pub removed: usize,
    pub failed: Vec<RetentionFailure>,
}

impl RetentionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct Retention {
    catalog: Catalog,
}

impl Retention {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// Delete all but the `keep` newest versions of `source`.
    ///
    /// Only a failure to list the history is an error; individual deletions
    /// are best-effort and reported in the returned [`RetentionReport`].
    pub fn retain(&self, source: &SourceFile, keep: usize) -> Result<RetentionReport> {
        let entries = self.catalog.list_entries(source)?;
        let report = prune(entries, keep);
        if report.removed > 0 || !report.is_clean() {
            info!(
                source = %source,
                keep,
                removed = report.removed,
                failed = report.failed.len(),
                "Retention pass finished"
            );
        }
        Ok(report)
    }
}

/// Delete everything in `entries` (oldest first) except the last `keep`
pub fn prune(entries: Vec<BackupEntry>, keep: usize) -> RetentionReport {
    let total = entries.len();
    if total <= keep {
        return RetentionReport {
            kept: total,
            ..RetentionReport::default()
        };
    }

    let mut report = RetentionReport {
        kept: keep,
        ..RetentionReport::default()
    };
    for entry in entries.into_iter().take(total - keep) {
        match fs::remove_file(&entry.storage_path) {
            Ok(()) => report.removed += 1,
            Err(error) => {
                warn!(
                    path = %entry.storage_path.display(),
                    error = %error,
                    "Failed to delete old backup"
                );
                report.failed.push(RetentionFailure { entry, error });
            }
        }
    }
    report
}
