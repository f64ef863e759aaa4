//! Mapping from a source file to its place in the backup tree.
//!
//! Backups live at
//! `root/{method}/{host}/{user}/{mirrored directory}/{basename}#{timestamp}[.ext]`.
//! The directory part depends only on the source identity, so every version
//! of one file lands in the same directory and shares the `basename#` prefix.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::{Clock, Timestamp};
use crate::source::{has_drive_letter, SourceFile};
use crate::utils::{Result, SavepointError};

/// Separates the source basename from the version timestamp
pub const VERSION_SEPARATOR: char = '#';

const POSIX_SEPARATORS: &[char] = &['/'];
const DRIVE_SEPARATORS: &[char] = &['/', '\\'];

/// Resolved backup location for a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub directory: PathBuf,
    pub basename: String,
    /// Present when a unique (versioned) name was requested
    pub timestamp: Option<Timestamp>,
}

impl Location {
    pub fn filename(&self) -> String {
        match &self.timestamp {
            Some(ts) => format!("{}{}{}", self.basename, VERSION_SEPARATOR, ts),
            None => self.basename.clone(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.directory.join(self.filename())
    }
}

/// Computes backup locations under a fixed root
pub struct PathMapper {
    root: PathBuf,
    current_user: String,
    clock: Arc<dyn Clock>,
}

impl PathMapper {
    pub fn new(root: impl Into<PathBuf>, current_user: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            current_user: current_user.into(),
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Compute the location without touching the filesystem
    pub fn resolve(&self, source: &SourceFile, unique: bool) -> Result<Location> {
        let (method, host, user) = source.identity(&self.current_user);
        for (what, value) in [("method", method), ("host", host), ("user", user)] {
            check_component(what, value)?;
        }

        let (dirs, basename) = split_local_path(source.local_path())?;

        let mut directory = self.root.join(method).join(host).join(user);
        for dir in dirs {
            directory.push(dir);
        }

        Ok(Location {
            directory,
            basename,
            timestamp: unique.then(|| self.clock.timestamp()),
        })
    }

    /// Compute the location and make sure its directory exists
    pub fn locate(&self, source: &SourceFile, unique: bool) -> Result<Location> {
        let location = self.resolve(source, unique)?;
        fs::create_dir_all(&location.directory)
            .map_err(|e| SavepointError::io(&location.directory, e))?;
        Ok(location)
    }
}

/// Split a source path into mirrored directory components and basename.
///
/// Only absolute paths are accepted.
///
/// A leading drive letter becomes an upper-case directory component, so
/// `c:/x/y.txt` and `C:/x/y.txt` share one backup directory. It shares that
/// namespace with a POSIX path starting at `/C/`.
fn split_local_path(path: &str) -> Result<(Vec<String>, String)> {
    let no_file_name = || SavepointError::InvalidSource(format!("'{}' has no file name", path));

    let mut components = Vec::new();
    let (rest, separators) = if has_drive_letter(path) {
        components.push(path[..1].to_ascii_uppercase());
        (&path[2..], DRIVE_SEPARATORS)
    } else if path.starts_with('/') {
        (path, POSIX_SEPARATORS)
    } else {
        return Err(SavepointError::InvalidSource(format!(
            "'{}' is not an absolute path",
            path
        )));
    };

    if matches!(rest.rsplit(separators).next(), None | Some("") | Some(".")) {
        return Err(no_file_name());
    }

    for part in rest.split(separators) {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(SavepointError::InvalidSource(format!(
                    "'{}' contains a parent directory component",
                    path
                )))
            }
            _ => components.push(part.to_string()),
        }
    }

    let basename = components.pop().ok_or_else(no_file_name)?;
    Ok((components, basename))
}

fn check_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(SavepointError::InvalidSource(format!(
            "{} '{}' cannot be used as a directory name",
            what, value
        )));
    }
    Ok(())
}
