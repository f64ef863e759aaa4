//! Listing the stored versions of a source file.

use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::{Timestamp, TIMESTAMP_LEN};
use crate::compress::Compression;
use crate::fs::mapper::{PathMapper, VERSION_SEPARATOR};
use crate::source::SourceFile;
use crate::utils::{Result, SavepointError};

/// One stored version of a source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub source_basename: String,
    pub timestamp: Timestamp,
    pub compression: Compression,
    pub storage_path: PathBuf,
    /// Stored size in bytes, after compression
    pub size: u64,
}

impl BackupEntry {
    /// Recognise `file_name` as a version of `basename` stored in `directory`.
    ///
    /// Accepts `basename#YYYY-MM-DD-HH-MM-SS` optionally followed by `.ext`
    /// for a known compression extension. Anything else is not a backup.
    pub fn parse(directory: &Path, basename: &str, file_name: &str) -> Option<Self> {
        let rest = file_name
            .strip_prefix(basename)?
            .strip_prefix(VERSION_SEPARATOR)?;
        if rest.len() < TIMESTAMP_LEN || !rest.is_char_boundary(TIMESTAMP_LEN) {
            return None;
        }
        let (stamp, suffix) = rest.split_at(TIMESTAMP_LEN);
        let timestamp = Timestamp::parse(stamp)?;
        let compression = match suffix {
            "" => Compression::None,
            _ => Compression::from_extension(suffix.strip_prefix('.')?)?,
        };

        Some(Self {
            source_basename: basename.to_string(),
            timestamp,
            compression,
            storage_path: directory.join(file_name),
            size: 0,
        })
    }

    /// Extension appended for the compression scheme, if any
    pub fn compression_ext(&self) -> Option<&'static str> {
        self.compression.extension()
    }

    pub fn file_name(&self) -> String {
        match self.compression_ext() {
            Some(ext) => format!("{}{}{}.{}", self.source_basename, VERSION_SEPARATOR, self.timestamp, ext),
            None => format!("{}{}{}", self.source_basename, VERSION_SEPARATOR, self.timestamp),
        }
    }

    /// `YYYY-MM-DD HH:MM:SS`
    pub fn label(&self) -> String {
        self.timestamp.label()
    }
}

/// Enumerates backup entries for source files
#[derive(Clone)]
pub struct Catalog {
    mapper: Arc<PathMapper>,
}

impl Catalog {
    pub fn new(mapper: Arc<PathMapper>) -> Self {
        Self { mapper }
    }

    /// All stored versions of `source`, oldest first.
    ///
    /// A source that was never backed up yields an empty list.
    pub fn list_entries(&self, source: &SourceFile) -> Result<Vec<BackupEntry>> {
        let location = self.mapper.resolve(source, false)?;
        let dir = &location.directory;

        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SavepointError::io(dir, e)),
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|e| SavepointError::io(dir, e))?;
            let file_name = dir_entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(mut entry) = BackupEntry::parse(dir, &location.basename, file_name) else {
                continue;
            };
            match dir_entry.metadata() {
                Ok(meta) if meta.is_file() => entry.size = meta.len(),
                Ok(_) => continue,
                // Removed between listing and stat
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(SavepointError::io(&entry.storage_path, e)),
            }
            entries.push(entry);
        }

        // Same-second versions under different schemes sort uncompressed first
        entries.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.compression_ext().cmp(&b.compression_ext()))
        });
        Ok(entries)
    }

    /// Like [`Catalog::list_entries`], but an empty history is `NotFound`
    pub fn require_entries(&self, source: &SourceFile) -> Result<Vec<BackupEntry>> {
        let entries = self.list_entries(source)?;
        if entries.is_empty() {
            return Err(SavepointError::NotFound(source.to_string()));
        }
        Ok(entries)
    }

    /// The version of `source` taken at `timestamp`
    pub fn find(&self, source: &SourceFile, timestamp: &Timestamp) -> Result<BackupEntry> {
        self.require_entries(source)?
            .into_iter()
            .find(|e| &e.timestamp == timestamp)
            .ok_or_else(|| SavepointError::NotFound(format!("{} at {}", source, timestamp)))
    }

    pub fn latest(&self, source: &SourceFile) -> Result<BackupEntry> {
        self.require_entries(source)?
            .pop()
            .ok_or_else(|| SavepointError::NotFound(source.to_string()))
    }
}
