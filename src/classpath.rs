use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, Result};
use crate::resolve::{DependencyGroup, DependencyResolver, ResolveRequest};
use crate::scan::list_archives;

#[cfg(windows)]
pub const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_SEPARATOR: char = ':';

/// Ordered search path. Earlier entries win, so insertion order is kept and
/// an identical path is only recorded the first time it is seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classpath {
    entries: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
}

impl Classpath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `path` unless it is already present. Returns whether it was added.
    pub fn push(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if !self.seen.insert(path.clone()) {
            return false;
        }
        self.entries.push(path);
        true
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `prefix` followed by the entries joined with the platform separator.
    pub fn render(&self, prefix: &str) -> String {
        let separator = PATH_SEPARATOR.to_string();
        let joined = self
            .entries
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join(separator.as_str());
        format!("{prefix}{joined}")
    }

    /// Joined form suitable for a single process argument.
    pub fn to_os_string(&self) -> Result<OsString> {
        std::env::join_paths(&self.entries)
            .map_err(|e| BuildError::Validation(format!("cannot join classpath: {e}")))
    }
}

pub struct ClasspathComposer<'a> {
    resolver: &'a dyn DependencyResolver,
}

impl<'a> ClasspathComposer<'a> {
    pub fn new(resolver: &'a dyn DependencyResolver) -> Self {
        Self { resolver }
    }

    /// Resolved group artifacts in declaration order, then archives found
    /// directly in each existing library directory, then `additional` as given.
    /// Every entry is made absolute before duplicates are dropped.
    pub fn compose(
        &self,
        groups: &[&DependencyGroup],
        library_dirs: &[PathBuf],
        additional: &[PathBuf],
    ) -> Result<Classpath> {
        let mut classpath = Classpath::new();

        for group in groups {
            for artifact in self.resolver.resolve(&ResolveRequest::for_classpath(group))? {
                classpath.push(absolute(&artifact)?);
            }
        }

        for dir in library_dirs {
            if !dir.is_dir() {
                log::debug!("skipping missing library directory {}", dir.display());
                continue;
            }
            for archive in list_archives(dir)? {
                classpath.push(absolute(&archive)?);
            }
        }

        for path in additional {
            classpath.push(absolute(path)?);
        }

        log::debug!("composed classpath with {} entries", classpath.len());
        Ok(classpath)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(BuildError::io(format!(
        "failed to resolve classpath entry {}",
        path.display()
    )))
}
