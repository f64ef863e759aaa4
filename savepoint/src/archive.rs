//! Writing one new backup entry per save.
//!
//! The host calls [`Archiver::archive`] (or [`Archiver::archive_file`]) once
//! the file is durably written. Policy guards run first; a failing guard is a
//! skip, never an error. The backup is written to a temporary file in the
//! destination directory and renamed into place, so a failed write leaves no
//! partial backup behind.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::catalog::BackupEntry;
use crate::compress::Compressor;
use crate::fs::mapper::{Location, PathMapper};
use crate::source::SourceFile;
use crate::utils::{Result, SavepointError};

/// Decides whether a source path should be backed up at all
pub trait PathFilter: Send + Sync {
    fn accept(&self, path: &str) -> bool;
}

impl<F> PathFilter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn accept(&self, path: &str) -> bool {
        self(path)
    }
}

/// Rejects paths containing any of the configured substrings
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    patterns: Vec<String>,
}

impl ExcludeFilter {
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns: patterns.into_iter().filter(|p| !p.is_empty()).collect(),
        }
    }
}

impl PathFilter for ExcludeFilter {
    fn accept(&self, path: &str) -> bool {
        !self.patterns.iter().any(|p| path.contains(p.as_str()))
    }
}

/// Why a save did not produce a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Remote sources are disabled
    RemoteDisabled,
    /// The path filter rejected the source
    Filtered,
    TooLarge { size: u64, limit: u64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::RemoteDisabled => f.write_str("remote files are not backed up"),
            SkipReason::Filtered => f.write_str("excluded by filter"),
            SkipReason::TooLarge { size, limit } => {
                write!(f, "{} bytes exceeds the size limit of {} bytes", size, limit)
            }
        }
    }
}

#[derive(Debug)]
pub enum ArchiveOutcome {
    Archived(BackupEntry),
    Skipped(SkipReason),
}

impl ArchiveOutcome {
    pub fn entry(&self) -> Option<&BackupEntry> {
        match self {
            ArchiveOutcome::Archived(entry) => Some(entry),
            ArchiveOutcome::Skipped(_) => None,
        }
    }
}

/// Guard settings applied before every archive
#[derive(Clone)]
pub struct ArchivePolicy {
    pub backup_remote_files: bool,
    /// `None` disables the limit
    pub size_limit: Option<u64>,
    pub filter: Arc<dyn PathFilter>,
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        Self {
            backup_remote_files: true,
            size_limit: None,
            filter: Arc::new(|_: &str| true),
        }
    }
}

impl ArchivePolicy {
    /// Guards that can be decided without the content
    fn check_source(&self, source: &SourceFile) -> Option<SkipReason> {
        if source.is_remote() && !self.backup_remote_files {
            return Some(SkipReason::RemoteDisabled);
        }
        if !self.filter.accept(source.local_path()) {
            return Some(SkipReason::Filtered);
        }
        None
    }

    fn check_size(&self, size: u64) -> Option<SkipReason> {
        match self.size_limit {
            Some(limit) if size > limit => Some(SkipReason::TooLarge { size, limit }),
            _ => None,
        }
    }
}

pub struct Archiver {
    mapper: Arc<PathMapper>,
    compressor: Compressor,
    policy: ArchivePolicy,
}

impl Archiver {
    pub fn new(mapper: Arc<PathMapper>, compressor: Compressor, policy: ArchivePolicy) -> Self {
        Self {
            mapper,
            compressor,
            policy,
        }
    }

    pub fn policy(&self) -> &ArchivePolicy {
        &self.policy
    }

    /// Store `content` as a new version of `source`
    pub fn archive(&self, source: &SourceFile, content: &[u8]) -> Result<ArchiveOutcome> {
        let skip = self
            .policy
            .check_source(source)
            .or_else(|| self.policy.check_size(content.len() as u64));
        if let Some(reason) = skip {
            debug!(source = %source, %reason, "Skipping backup");
            return Ok(ArchiveOutcome::Skipped(reason));
        }

        self.write_version(source, content).map(ArchiveOutcome::Archived)
    }

    /// Read `path` and store it as a new version of `source`.
    ///
    /// The size guard is checked against file metadata first, so oversized
    /// files are never read.
    pub fn archive_file(&self, source: &SourceFile, path: &Path) -> Result<ArchiveOutcome> {
        let skip = match self.policy.check_source(source) {
            Some(reason) => Some(reason),
            None => {
                let meta = fs::metadata(path).map_err(|e| SavepointError::io(path, e))?;
                self.policy.check_size(meta.len())
            }
        };
        if let Some(reason) = skip {
            debug!(source = %source, %reason, "Skipping backup");
            return Ok(ArchiveOutcome::Skipped(reason));
        }

        let content = fs::read(path).map_err(|e| SavepointError::io(path, e))?;
        self.archive(source, &content)
    }

    fn write_version(&self, source: &SourceFile, content: &[u8]) -> Result<BackupEntry> {
        let location = self.mapper.locate(source, true)?;
        let encoded = self.compressor.encode(content)?;
        let entry = entry_for(&location, self.compressor, encoded.len() as u64)?;

        write_atomic(&location.directory, &entry.storage_path, &encoded)?;

        info!(
            source = %source,
            path = %entry.storage_path.display(),
            bytes = content.len(),
            stored = entry.size,
            "Backup written"
        );
        Ok(entry)
    }
}

fn entry_for(location: &Location, compressor: Compressor, size: u64) -> Result<BackupEntry> {
    let timestamp = location
        .timestamp
        .clone()
        .ok_or_else(|| SavepointError::InvalidSource("location has no version timestamp".into()))?;
    let mut entry = BackupEntry {
        source_basename: location.basename.clone(),
        timestamp,
        compression: compressor.scheme(),
        storage_path: Default::default(),
        size,
    };
    entry.storage_path = location.directory.join(entry.file_name());
    Ok(entry)
}

/// Write to a temp file in `dir`, then rename over `target`.
///
/// An existing `target` (a save within the same second) is replaced.
fn write_atomic(dir: &Path, target: &Path, data: &[u8]) -> Result<()> {
    let mut temp = tempfile::Builder::new()
        .prefix(".savepoint-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| SavepointError::io(dir, e))?;

    temp.write_all(data)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| SavepointError::io(temp.path(), e))?;

    temp.persist(target)
        .map_err(|e| SavepointError::io(target, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::clock::ManualClock;
    use crate::compress::Compression;
    use crate::source::RemoteDescriptor;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        clock: Arc<ManualClock>,
        mapper: Arc<PathMapper>,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(23, 59, 58)
            .unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let mapper = Arc::new(PathMapper::new(temp_dir.path(), "alice", clock.clone()));
        Fixture {
            _temp_dir: temp_dir,
            clock,
            mapper,
        }
    }

    fn archiver(f: &Fixture, scheme: Compression, policy: ArchivePolicy) -> Archiver {
        Archiver::new(f.mapper.clone(), Compressor::new(scheme, None), policy)
    }

    fn remote_source() -> SourceFile {
        SourceFile::remote(
            RemoteDescriptor {
                method: "ssh".into(),
                host: "h".into(),
                user: "u".into(),
            },
            "/etc/x.conf",
        )
    }

    #[test]
    fn test_archive_writes_versioned_file() {
        let f = fixture();
        let archiver = archiver(&f, Compression::None, ArchivePolicy::default());
        let source = SourceFile::local("/home/u/project/file.txt");

        let outcome = archiver.archive(&source, b"hello").unwrap();
        let entry = outcome.entry().unwrap();
        assert_eq!(entry.timestamp.as_str(), "2024-02-29-23-59-58");
        assert!(entry
            .storage_path
            .ends_with("local/localhost/alice/home/u/project/file.txt#2024-02-29-23-59-58"));
        assert_eq!(fs::read(&entry.storage_path).unwrap(), b"hello");
    }

    #[test]
    fn test_zstd_backup_has_extension_and_decodes() {
        let f = fixture();
        let archiver = archiver(&f, Compression::Zstd, ArchivePolicy::default());
        let source = SourceFile::local("/home/u/project/file.txt");

        let outcome = archiver.archive(&source, b"compressed content").unwrap();
        let entry = outcome.entry().unwrap();
        assert!(entry.storage_path.to_string_lossy().ends_with(".zst"));
        let stored = fs::read(&entry.storage_path).unwrap();
        assert_eq!(
            Compressor::decode(Compression::Zstd, &stored).unwrap(),
            b"compressed content"
        );
    }

    #[test]
    fn test_size_limit_skips_and_leaves_catalog_unchanged() {
        let f = fixture();
        let policy = ArchivePolicy {
            size_limit: Some(100),
            ..ArchivePolicy::default()
        };
        let archiver = archiver(&f, Compression::None, policy);
        let source = SourceFile::local("/home/u/project/file.txt");

        let outcome = archiver.archive(&source, &[b'x'; 200]).unwrap();
        assert!(matches!(
            outcome,
            ArchiveOutcome::Skipped(SkipReason::TooLarge { size: 200, limit: 100 })
        ));
        let catalog = Catalog::new(f.mapper.clone());
        assert!(catalog.list_entries(&source).unwrap().is_empty());

        // exactly at the limit is allowed
        let outcome = archiver.archive(&source, &[b'x'; 100]).unwrap();
        assert!(outcome.entry().is_some());
    }

    #[test]
    fn test_remote_sources_respect_policy() {
        let f = fixture();
        let denied = archiver(
            &f,
            Compression::None,
            ArchivePolicy {
                backup_remote_files: false,
                ..ArchivePolicy::default()
            },
        );
        let outcome = denied.archive(&remote_source(), b"conf").unwrap();
        assert!(matches!(outcome, ArchiveOutcome::Skipped(SkipReason::RemoteDisabled)));

        let allowed = archiver(&f, Compression::None, ArchivePolicy::default());
        let outcome = allowed.archive(&remote_source(), b"conf").unwrap();
        let entry = outcome.entry().unwrap();
        assert!(entry
            .storage_path
            .ends_with("ssh/h/u/etc/x.conf#2024-02-29-23-59-58"));
    }

    #[test]
    fn test_filter_skips() {
        let f = fixture();
        let policy = ArchivePolicy {
            filter: Arc::new(ExcludeFilter::new(vec!["/.git/".into()])),
            ..ArchivePolicy::default()
        };
        let archiver = archiver(&f, Compression::None, policy);

        let outcome = archiver
            .archive(&SourceFile::local("/repo/.git/COMMIT_EDITMSG"), b"msg")
            .unwrap();
        assert!(matches!(outcome, ArchiveOutcome::Skipped(SkipReason::Filtered)));
        let outcome = archiver
            .archive(&SourceFile::local("/repo/src/main.rs"), b"fn main() {}")
            .unwrap();
        assert!(outcome.entry().is_some());
    }

    #[test]
    fn test_closure_filter() {
        let f = fixture();
        let policy = ArchivePolicy {
            filter: Arc::new(|path: &str| !path.ends_with(".log")),
            ..ArchivePolicy::default()
        };
        let archiver = archiver(&f, Compression::None, policy);
        let outcome = archiver.archive(&SourceFile::local("/var/app.log"), b"x").unwrap();
        assert!(matches!(outcome, ArchiveOutcome::Skipped(SkipReason::Filtered)));
    }

    #[test]
    fn test_same_second_saves_share_one_backup() {
        let f = fixture();
        let archiver = archiver(&f, Compression::None, ArchivePolicy::default());
        let source = SourceFile::local("/home/u/project/file.txt");

        let first = archiver.archive(&source, b"first").unwrap();
        let second = archiver.archive(&source, b"second").unwrap();
        let (first, second) = (first.entry().unwrap(), second.entry().unwrap());
        assert_eq!(first.storage_path, second.storage_path);
        // the later save replaces the earlier one
        assert_eq!(fs::read(&second.storage_path).unwrap(), b"second");
        let catalog = Catalog::new(f.mapper.clone());
        assert_eq!(catalog.list_entries(&source).unwrap().len(), 1);

        f.clock.advance(1);
        archiver.archive(&source, b"third").unwrap();
        assert_eq!(catalog.list_entries(&source).unwrap().len(), 2);
    }

    #[test]
    fn test_archive_file_checks_size_before_reading() -> std::io::Result<()> {
        let f = fixture();
        let policy = ArchivePolicy {
            size_limit: Some(4),
            ..ArchivePolicy::default()
        };
        let archiver = archiver(&f, Compression::Gzip, policy);
        let work = TempDir::new()?;
        let small = work.path().join("small.txt");
        let large = work.path().join("large.txt");
        fs::write(&small, b"abc")?;
        fs::write(&large, b"abcdefgh")?;

        let outcome = archiver.archive_file(&SourceFile::local(&large), &large).unwrap();
        assert!(matches!(outcome, ArchiveOutcome::Skipped(SkipReason::TooLarge { .. })));

        let outcome = archiver.archive_file(&SourceFile::local(&small), &small).unwrap();
        let entry = outcome.entry().unwrap();
        assert!(entry.storage_path.to_string_lossy().ends_with(".gz"));
        Ok(())
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let f = fixture();
        let archiver = archiver(&f, Compression::None, ArchivePolicy::default());
        let missing = Path::new("/definitely/not/here.txt");
        let err = archiver
            .archive_file(&SourceFile::local(missing), missing)
            .unwrap_err();
        assert!(matches!(err, SavepointError::Io { .. }));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let f = fixture();
        let archiver = archiver(&f, Compression::Xz, ArchivePolicy::default());
        let source = SourceFile::local("/home/u/project/file.txt");
        let entry = archiver.archive(&source, b"data").unwrap();
        let dir = entry.entry().unwrap().storage_path.parent().unwrap().to_path_buf();
        let names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["file.txt#2024-02-29-23-59-58.xz".to_string()]);
    }
}
