use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{BuildError, Result};

pub const ARCHIVE_EXTENSION: &str = "jar";

/// One regular file found under a scanned root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub modified: SystemTime,
}

pub fn default_local_repository() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| BuildError::Configuration {
        tool: "local repository".to_string(),
        reason: "cannot determine home directory".to_string(),
    })?;
    Ok(home.join(".m2").join("repository"))
}

fn walker(root: &Path) -> WalkBuilder {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(true)
        .sort_by_file_name(|a, b| a.cmp(b));
    builder
}

/// Walks `root` recursively and returns every file whose name ends with
/// `.{extension}`, or every file when `extension` is `None`.
///
/// A missing root yields an empty list. Records are ordered by relative path.
pub fn scan_files(root: &Path, extension: Option<&str>) -> Result<Vec<FileRecord>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in walker(root).build() {
        let entry = entry.map_err(|e| BuildError::Io {
            context: format!("failed to walk {}", root.display()),
            source: e.into_io_error().unwrap_or_else(|| std::io::Error::other("walk error")),
        })?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if let Some(ext) = extension
            && path.extension().is_none_or(|e| e != ext)
        {
            continue;
        }

        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let relative_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        records.push(FileRecord {
            relative_path,
            absolute_path: path.to_path_buf(),
            modified,
        });
    }

    records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(records)
}

/// Lists archives directly inside `dir` (no recursion), sorted by name.
/// A directory that does not exist yields nothing.
pub fn list_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(dir)
        .map_err(BuildError::io(format!("failed to list {}", dir.display())))?;
    let mut archives = Vec::new();
    for entry in entries {
        let entry = entry.map_err(BuildError::io(format!("failed to list {}", dir.display())))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ARCHIVE_EXTENSION) {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

/// Relative paths of every directory below `root`, excluding `root` itself.
pub fn list_subdirectories(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut dirs = Vec::new();
    for entry in walker(root).build() {
        let Ok(entry) = entry else {
            continue;
        };
        if entry.depth() == 0 || !entry.file_type().is_some_and(|t| t.is_dir()) {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            dirs.push(rel.to_path_buf());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Turns a relative directory such as `com/acme/util` into `com.acme.util`.
pub fn package_name(relative_dir: &Path) -> String {
    relative_dir
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join(".")
}
