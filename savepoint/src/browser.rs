//! Read-only access to stored versions.
//!
//! Picking a version interactively is left to the host: the browser hands out
//! an ordered, labelled candidate list and takes the choice back through a
//! [`Selector`].

use std::fs;

use crate::catalog::{BackupEntry, Catalog};
use crate::clock::Timestamp;
use crate::compress::Compressor;
use crate::source::SourceFile;
use crate::utils::{Result, SavepointError};

/// A version offered for selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub label: String,
    pub entry: BackupEntry,
}

/// Chooses one version out of the candidates, oldest first
pub trait Selector {
    fn select<'a>(&self, candidates: &'a [Candidate]) -> Option<&'a Candidate>;
}

/// Picks the newest version
#[derive(Debug, Default, Clone, Copy)]
pub struct LatestSelector;

impl Selector for LatestSelector {
    fn select<'a>(&self, candidates: &'a [Candidate]) -> Option<&'a Candidate> {
        candidates.last()
    }
}

/// Picks the version taken at exactly this timestamp
#[derive(Debug, Clone)]
pub struct VersionSelector(pub Timestamp);

impl Selector for VersionSelector {
    fn select<'a>(&self, candidates: &'a [Candidate]) -> Option<&'a Candidate> {
        candidates.iter().find(|c| c.entry.timestamp == self.0)
    }
}

/// Decoded content of one version together with what it is a copy of
#[derive(Debug, Clone)]
pub struct OpenedBackup {
    pub original_basename: String,
    pub label: String,
    pub content: Vec<u8>,
}

impl OpenedBackup {
    pub fn header(&self) -> String {
        format!("==> {} ({}) <==\n", self.original_basename, self.label)
    }

    /// Content for display, annotated with [`OpenedBackup::header`] if asked
    pub fn render(&self, show_header: bool) -> Vec<u8> {
        if !show_header {
            return self.content.clone();
        }
        let header = self.header();
        let mut out = Vec::with_capacity(header.len() + self.content.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.content);
        out
    }
}

#[derive(Clone)]
pub struct Browser {
    catalog: Catalog,
    show_header: bool,
}

impl Browser {
    pub fn new(catalog: Catalog, show_header: bool) -> Self {
        Self {
            catalog,
            show_header,
        }
    }

    pub fn show_header(&self) -> bool {
        self.show_header
    }

    /// `YYYY-MM-DD HH:MM:SS` for an entry
    pub fn label(entry: &BackupEntry) -> String {
        entry.label()
    }

    /// Every version of `source`, oldest first, ready to present for selection
    pub fn candidates(&self, source: &SourceFile) -> Result<Vec<Candidate>> {
        Ok(self
            .catalog
            .require_entries(source)?
            .into_iter()
            .map(|entry| Candidate {
                label: Browser::label(&entry),
                entry,
            })
            .collect())
    }

    /// Read and decode one version of `source`
    pub fn open(&self, source: &SourceFile, entry: &BackupEntry) -> Result<OpenedBackup> {
        let stored = fs::read(&entry.storage_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SavepointError::NotFound(format!(
                "{} at {}",
                source, entry.timestamp
            )),
            _ => SavepointError::io(&entry.storage_path, e),
        })?;
        let content = Compressor::decode(entry.compression, &stored)?;

        Ok(OpenedBackup {
            original_basename: entry.source_basename.clone(),
            label: Browser::label(entry),
            content,
        })
    }

    /// Let `selector` pick among the candidates, then open its choice
    pub fn open_with(&self, source: &SourceFile, selector: &dyn Selector) -> Result<OpenedBackup> {
        let candidates = self.candidates(source)?;
        let chosen = selector
            .select(&candidates)
            .ok_or_else(|| SavepointError::NotFound(format!("no matching version of {}", source)))?;
        self.open(source, &chosen.entry)
    }

    /// Content as configured for display
    pub fn render(&self, opened: &OpenedBackup) -> Vec<u8> {
        opened.render(self.show_header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchivePolicy, Archiver};
    use crate::clock::ManualClock;
    use crate::compress::Compression;
    use crate::fs::mapper::PathMapper;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        clock: Arc<ManualClock>,
        archiver: Archiver,
        browser: Browser,
    }

    fn fixture(scheme: Compression) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let start = NaiveDate::from_ymd_opt(2023, 11, 5)
            .unwrap()
            .and_hms_opt(14, 7, 9)
            .unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let mapper = Arc::new(PathMapper::new(temp_dir.path(), "u", clock.clone()));
        Fixture {
            archiver: Archiver::new(mapper.clone(), Compressor::new(scheme, None), ArchivePolicy::default()),
            browser: Browser::new(Catalog::new(mapper), true),
            clock,
            _temp_dir: temp_dir,
        }
    }

    #[test]
    fn test_label_format() {
        let f = fixture(Compression::None);
        let source = SourceFile::local("/notes/todo.md");
        let outcome = f.archiver.archive(&source, b"- milk").unwrap();
        assert_eq!(Browser::label(outcome.entry().unwrap()), "2023-11-05 14:07:09");
    }

    #[test]
    fn test_open_zstd_returns_original_bytes() {
        let f = fixture(Compression::Zstd);
        let source = SourceFile::local("/notes/todo.md");
        let original = b"- milk\n- eggs\n".to_vec();
        let outcome = f.archiver.archive(&source, &original).unwrap();
        let entry = outcome.entry().unwrap();
        assert!(entry.storage_path.to_string_lossy().ends_with(".zst"));

        let opened = f.browser.open(&source, entry).unwrap();
        assert_eq!(opened.content, original);
        assert_eq!(opened.original_basename, "todo.md");
        assert_eq!(opened.label, "2023-11-05 14:07:09");
        // opening never changes the stored entry
        assert!(entry.storage_path.exists());
    }

    #[test]
    fn test_candidates_are_ordered_and_labelled() {
        let f = fixture(Compression::Gzip);
        let source = SourceFile::local("/notes/todo.md");
        for body in ["a", "b", "c"] {
            f.archiver.archive(&source, body.as_bytes()).unwrap();
            f.clock.advance(61);
        }

        let candidates = f.browser.candidates(&source).unwrap();
        let labels: Vec<&str> = candidates.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["2023-11-05 14:07:09", "2023-11-05 14:08:10", "2023-11-05 14:09:11"]
        );
    }

    #[test]
    fn test_open_with_selectors() {
        let f = fixture(Compression::Bzip2);
        let source = SourceFile::local("/notes/todo.md");
        f.archiver.archive(&source, b"first").unwrap();
        f.clock.advance(5);
        f.archiver.archive(&source, b"second").unwrap();

        let latest = f.browser.open_with(&source, &LatestSelector).unwrap();
        assert_eq!(latest.content, b"second");

        let wanted = VersionSelector(Timestamp::parse("2023-11-05-14-07-09").unwrap());
        let first = f.browser.open_with(&source, &wanted).unwrap();
        assert_eq!(first.content, b"first");

        let absent = VersionSelector(Timestamp::parse("1999-01-01-00-00-00").unwrap());
        assert!(matches!(
            f.browser.open_with(&source, &absent),
            Err(SavepointError::NotFound(_))
        ));
    }

    #[test]
    fn test_no_history_is_not_found() {
        let f = fixture(Compression::None);
        let source = SourceFile::local("/never/saved.txt");
        assert!(matches!(
            f.browser.candidates(&source),
            Err(SavepointError::NotFound(_))
        ));
    }

    #[test]
    fn test_render_with_header() {
        let opened = OpenedBackup {
            original_basename: "todo.md".into(),
            label: "2023-11-05 14:07:09".into(),
            content: b"body".to_vec(),
        };
        assert_eq!(opened.render(false), b"body");
        assert_eq!(
            String::from_utf8(opened.render(true)).unwrap(),
            "==> todo.md (2023-11-05 14:07:09) <==\nbody"
        );
    }
}
