//! Timestamp-based staleness detection.
//!
//! A source file is stale when the file it compiles to is missing or has an
//! older modification time. Only names are compared: a source that depends on
//! a changed file is not itself reported. The compiler still receives the
//! whole source root through `-sourcepath`, so references keep resolving.

use rayon::prelude::*;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::scan::scan_files;

/// Maps a source path, relative to the source root, to the output path it
/// produces, relative to the output root.
pub trait NameMapping: Sync {
    fn output_for(&self, source_relative: &Path) -> PathBuf;
}

impl<F> NameMapping for F
where
    F: Fn(&Path) -> PathBuf + Sync,
{
    fn output_for(&self, source_relative: &Path) -> PathBuf {
        self(source_relative)
    }
}

/// Replaces one file extension with another, keeping the directory layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionMapping {
    from: String,
    to: String,
}

impl ExtensionMapping {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn java_to_class() -> Self {
        Self::new("java", "class")
    }

    pub fn source_extension(&self) -> &str {
        &self.from
    }
}

impl NameMapping for ExtensionMapping {
    fn output_for(&self, source_relative: &Path) -> PathBuf {
        if source_relative.extension().is_some_and(|e| e == self.from.as_str()) {
            source_relative.with_extension(&self.to)
        } else {
            source_relative.to_path_buf()
        }
    }
}

/// Returns the absolute paths of sources under `source_root` with the given
/// extension whose mapped output under `output_root` is missing or older.
///
/// A missing `source_root` is not an error; it simply has nothing to compile.
/// The result follows the walk order, which is sorted by relative path.
pub fn find_stale(
    source_root: &Path,
    output_root: &Path,
    extension: &str,
    mapper: &dyn NameMapping,
) -> Result<Vec<PathBuf>> {
    let sources = scan_files(source_root, Some(extension))?;

    let stale = sources
        .par_iter()
        .filter(|record| {
            let target = output_root.join(mapper.output_for(&record.relative_path));
            match target.metadata().and_then(|m| m.modified()) {
                Ok(output_mtime) => output_mtime < record.modified,
                Err(_) => true,
            }
        })
        .map(|record| record.absolute_path.clone())
        .collect();

    Ok(stale)
}
