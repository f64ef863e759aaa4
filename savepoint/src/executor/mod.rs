//! Backup executor - runs save pipelines on a bounded worker pool.
//!
//! Each save runs synchronously on the blocking pool. A semaphore bounds how
//! many run at once, and [`locks::PathLocks`] keeps work on one source file
//! strictly ordered regardless of scheduling.

pub mod locks;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::archive::ArchiveOutcome;
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::retention::RetentionReport;
use crate::service::{BackupService, SaveReport};
use crate::source::SourceFile;
use crate::utils::{Result, SavepointError};
use locks::PathLocks;

/// Result of backing up every file below a directory
#[derive(Debug, Default)]
pub struct TreeReport {
    pub archived: usize,
    pub skipped: usize,
    /// Versions removed by automatic cleanup
    pub cleaned: usize,
    pub failed: Vec<(PathBuf, SavepointError)>,
}

impl TreeReport {
    fn record(&mut self, path: PathBuf, result: Result<SaveReport>) {
        match result {
            Ok(report) => {
                match report.outcome {
                    ArchiveOutcome::Archived(_) => self.archived += 1,
                    ArchiveOutcome::Skipped(_) => self.skipped += 1,
                }
                self.cleaned += report.cleanup.map_or(0, |c: RetentionReport| c.removed);
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Backup failed");
                self.failed.push((path, e));
            }
        }
    }
}

/// Main backup executor
#[derive(Clone)]
pub struct BackupExecutor {
    service: Arc<BackupService>,
    locks: PathLocks,
    permits: Arc<Semaphore>,
}

impl BackupExecutor {
    pub fn new(service: Arc<BackupService>, max_concurrent: usize) -> Self {
        Self {
            service,
            locks: PathLocks::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn service(&self) -> &Arc<BackupService> {
        &self.service
    }

    /// Back up `source` from the file at `path`, serialised against any other
    /// work on the same source
    pub async fn save_file(&self, source: SourceFile, path: PathBuf) -> Result<SaveReport> {
        let key = source.clone();
        self.run_serialized(&key, move |service| service.save_file(&source, &path))
            .await
    }

    /// Back up `content` as a new version of `source`
    pub async fn save_content(&self, source: SourceFile, content: Vec<u8>) -> Result<SaveReport> {
        let key = source.clone();
        self.run_serialized(&key, move |service| service.on_save(&source, &content))
            .await
    }

    /// Apply retention to `source`, serialised against saves of it
    pub async fn retain(&self, source: SourceFile, keep: usize) -> Result<RetentionReport> {
        let key = source.clone();
        self.run_serialized(&key, move |service| service.retention().retain(&source, keep))
            .await
    }

    async fn run_serialized<T, F>(&self, source: &SourceFile, work: F) -> Result<T>
    where
        F: FnOnce(&BackupService) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let key = self.service.location(source)?.path();
        let _lease = self.locks.acquire(key).await;
        // never closed, so this only waits for a free slot
        let _permit = self.permits.acquire().await.ok();

        let service = self.service.clone();
        tokio::task::spawn_blocking(move || work(&service)).await?
    }

    /// Back up every regular file below `root`, never descending into the
    /// backup tree itself
    pub async fn backup_tree(&self, root: &Path, options: WalkOptions) -> Result<TreeReport> {
        let options = options.pruning(self.service.root());
        let scan_root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || walk_directory(&scan_root, &options))
            .await?
            .map_err(|e| SavepointError::io(root, e))?;

        info!(root = %root.display(), files = files.len(), "Backing up directory");

        let mut tasks = JoinSet::new();
        for file in files {
            let executor = self.clone();
            tasks.spawn(async move {
                let source = SourceFile::local(&file.path);
                let result = executor.save_file(source, file.path.clone()).await;
                (file.path, result)
            });
        }

        let mut report = TreeReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (path, result) = joined?;
            report.record(path, result);
        }

        info!(
            root = %root.display(),
            archived = report.archived,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Directory backup finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::compress::Compression;
    use crate::config::Config;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    fn executor(root: &Path, tweak: impl FnOnce(&mut Config)) -> (BackupExecutor, Arc<ManualClock>) {
        let mut config = Config::default();
        config.backup.root = root.to_path_buf();
        tweak(&mut config);
        let start = NaiveDate::from_ymd_opt(2024, 7, 7)
            .unwrap()
            .and_hms_opt(7, 7, 7)
            .unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let service = BackupService::with_clock(&config, clock.clone()).unwrap();
        (BackupExecutor::new(Arc::new(service), 3), clock)
    }

    #[tokio::test]
    async fn test_backup_tree_archives_every_file() -> std::io::Result<()> {
        let backups = TempDir::new()?;
        let work = TempDir::new()?;
        fs::create_dir_all(work.path().join("src/nested"))?;
        fs::create_dir_all(work.path().join("target"))?;
        fs::write(work.path().join("README.md"), b"readme")?;
        fs::write(work.path().join("src/lib.rs"), b"pub fn f() {}")?;
        fs::write(work.path().join("src/nested/mod.rs"), b"mod x;")?;
        fs::write(work.path().join("target/big.bin"), vec![0u8; 64])?;

        let (executor, _clock) = executor(backups.path(), |c| c.backup.size_limit = Some(32));
        let report = executor
            .backup_tree(work.path(), WalkOptions::default())
            .await
            .unwrap();

        assert_eq!(report.archived, 3);
        assert_eq!(report.skipped, 1);
        assert!(report.failed.is_empty());

        let source = SourceFile::local(work.path().join("src/lib.rs"));
        let entries = executor.service().catalog().list_entries(&source).unwrap();
        assert_eq!(entries.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_excluded_directories_are_not_walked() -> std::io::Result<()> {
        let backups = TempDir::new()?;
        let work = TempDir::new()?;
        fs::create_dir_all(work.path().join(".git"))?;
        fs::write(work.path().join(".git/HEAD"), b"ref")?;
        fs::write(work.path().join("main.rs"), b"fn main() {}")?;

        let (executor, _clock) = executor(backups.path(), |_| {});
        let report = executor
            .backup_tree(work.path(), WalkOptions::excluding(vec![".git".into()]))
            .await
            .unwrap();
        assert_eq!(report.archived, 1);
        assert_eq!(report.skipped, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_root_inside_tree_is_not_archived() -> std::io::Result<()> {
        let work = TempDir::new()?;
        fs::write(work.path().join("a.txt"), b"alpha")?;
        let (executor, clock) = executor(&work.path().join(".backups"), |_| {});

        for _ in 0..3 {
            let report = executor
                .backup_tree(work.path(), WalkOptions::default())
                .await
                .unwrap();
            assert_eq!(report.archived, 1);
            assert_eq!(report.skipped, 0);
            assert!(report.failed.is_empty());
            clock.advance(1);
        }

        let source = SourceFile::local(work.path().join("a.txt"));
        let entries = executor.service().catalog().list_entries(&source).unwrap();
        assert_eq!(entries.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_saves_of_one_file_leave_one_whole_version() -> std::io::Result<()> {
        let backups = TempDir::new()?;
        let (executor, _clock) = executor(backups.path(), |c| {
            c.backup.compression = Compression::None;
            c.backup.size_limit = None;
        });
        let source = SourceFile::local("/home/u/project/file.txt");
        const LEN: usize = 256 * 1024;

        // Same second for every save: each one replaces the previous file
        let mut handles = Vec::new();
        for i in 0..6u8 {
            let executor = executor.clone();
            let source = source.clone();
            handles.push(tokio::spawn(async move {
                executor.save_content(source, vec![i; LEN]).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        let entries = executor.service().catalog().list_entries(&source).unwrap();
        assert_eq!(entries.len(), 1);
        let stored = fs::read(&entries[0].storage_path)?;
        assert_eq!(stored.len(), LEN);
        assert!(stored[0] < 6);
        assert!(stored.iter().all(|&b| b == stored[0]));

        let dir = entries[0].storage_path.parent().unwrap();
        assert_eq!(fs::read_dir(dir)?.count(), 1);
        assert_eq!(executor.locks.active(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_retain_through_executor() -> std::io::Result<()> {
        let backups = TempDir::new()?;
        let (executor, clock) = executor(backups.path(), |_| {});
        let source = SourceFile::local("/srv/app.toml");
        for i in 0..4 {
            executor
                .save_content(source.clone(), vec![i; 8])
                .await
                .unwrap();
            clock.advance(1);
        }

        let report = executor.retain(source.clone(), 1).await.unwrap();
        assert_eq!(report.removed, 3);
        assert_eq!(
            executor.service().catalog().list_entries(&source).unwrap().len(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_is_reported_not_fatal() {
        let backups = TempDir::new().unwrap();
        let (executor, _clock) = executor(backups.path(), |_| {});
        let missing = PathBuf::from("/definitely/not/here.txt");
        let result = executor
            .save_file(SourceFile::local(&missing), missing.clone())
            .await;
        assert!(matches!(result, Err(SavepointError::Io { .. })));
    }
}
