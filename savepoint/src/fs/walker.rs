//! Directory traversal for backing up a whole tree at once.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Maximum depth (None = unlimited)
    pub max_depth: Option<usize>,

    /// Entries whose name contains any of these are skipped, directories
    /// together with everything below them
    pub exclude_patterns: Vec<String>,

    /// Directories never descended into, wherever they appear in the tree
    pub prune_dirs: Vec<PathBuf>,
}

impl WalkOptions {
    pub fn excluding(patterns: Vec<String>) -> Self {
        Self {
            exclude_patterns: patterns.into_iter().filter(|p| !p.is_empty()).collect(),
            ..Self::default()
        }
    }

    /// Also skip `dir` and everything below it
    pub fn pruning(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prune_dirs.push(dir.into());
        self
    }
}

/// A regular file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,
}

impl FileInfo {
    /// Create FileInfo from a DirEntry.
    /// Returns None for anything that does not resolve to a regular file.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let path = entry.path().to_path_buf();
        let metadata = if entry.path_is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) => resolved,
                // Broken symlink
                Err(_) => return Ok(None),
            }
        } else {
            entry.metadata()?
        };
        if !metadata.is_file() {
            return Ok(None);
        }

        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        Ok(Some(Self {
            path,
            relative_path,
            size: metadata.len(),
        }))
    }
}

/// Walk a directory tree and collect all regular files, sorted by path
///
/// # Example
/// ```no_run
/// use savepoint::fs::walker::{walk_directory, WalkOptions};
/// use std::path::Path;
///
/// let files = walk_directory(Path::new("/data"), &WalkOptions::default()).unwrap();
/// println!("Found {} files", files.len());
/// ```
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    let mut walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name();

    if let Some(max_depth) = options.max_depth {
        walker = walker.max_depth(max_depth);
    }

    let pruned: Vec<PathBuf> = options
        .prune_dirs
        .iter()
        .map(|dir| dir.canonicalize().unwrap_or_else(|_| dir.clone()))
        .collect();

    let walker = walker.into_iter().filter_entry(|entry| {
        !is_pruned(entry, &pruned)
            && (entry.depth() == 0 || !should_exclude(entry, &options.exclude_patterns))
    });

    for entry in walker {
        let entry = entry?;

        if entry.file_type().is_dir() {
            continue;
        }

        if let Some(file_info) = FileInfo::from_entry(&entry, root)? {
            files.push(file_info);
        }
    }

    Ok(files)
}

/// Whether `entry` is one of `pruned` or lies below one
fn is_pruned(entry: &DirEntry, pruned: &[PathBuf]) -> bool {
    if pruned.is_empty() || !entry.file_type().is_dir() {
        return false;
    }
    let path = entry
        .path()
        .canonicalize()
        .unwrap_or_else(|_| entry.path().to_path_buf());
    pruned.iter().any(|dir| path.starts_with(dir))
}

/// Check if a directory entry should be excluded based on patterns
fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    patterns.iter().any(|pattern| file_name.contains(pattern.as_str()))
}
