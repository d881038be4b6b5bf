//! Dependency resolution seam.
//!
//! Resolution itself is somebody else's job; the build only needs an ordered,
//! de-duplicated list of artifact files per group. [`LocalRepository`] maps
//! coordinates onto an already-populated Maven-layout directory.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use crate::error::{BuildError, Result};

/// A named set of declared dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependencyGroup {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default = "default_transitive")]
    pub transitive: bool,
    /// Other groups pulled in when this group is resolved transitively.
    #[serde(default)]
    pub includes: Vec<String>,
    /// Opaque options handed to the resolver.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn default_transitive() -> bool {
    true
}

impl DependencyGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifacts: Vec::new(),
            transitive: true,
            includes: Vec::new(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_artifacts<I, S>(mut self, artifacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artifacts.extend(artifacts.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone)]
pub struct ResolveRequest<'a> {
    pub group: &'a DependencyGroup,
    pub transitive: bool,
    /// Group names that may be followed transitively. Empty means any.
    pub scopes: &'a [String],
    pub fetch_sources: bool,
}

impl<'a> ResolveRequest<'a> {
    /// Resolution as used for classpaths: the group's own transitivity, any scope.
    pub fn for_classpath(group: &'a DependencyGroup) -> Self {
        Self {
            group,
            transitive: group.transitive,
            scopes: &[],
            fetch_sources: false,
        }
    }
}

pub trait DependencyResolver {
    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Vec<PathBuf>>;
}

/// Resolves `group:artifact:version[:classifier]` coordinates against a
/// Maven-style directory tree.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
    groups: BTreeMap<String, DependencyGroup>,
}

impl LocalRepository {
    pub fn new(root: PathBuf, groups: BTreeMap<String, DependencyGroup>) -> Self {
        Self { root, groups }
    }

    pub fn group(&self, name: &str) -> Result<&DependencyGroup> {
        self.groups
            .get(name)
            .ok_or_else(|| BuildError::Validation(format!("unknown dependency group '{name}'")))
    }

    pub fn artifact_path(&self, coordinate: &str, classifier: Option<&str>) -> Result<PathBuf> {
        let parts: Vec<&str> = coordinate.split(':').collect();
        let (group, artifact, version, declared) = match parts.as_slice() {
            [g, a, v] => (*g, *a, *v, None),
            [g, a, v, c] => (*g, *a, *v, Some(*c)),
            _ => {
                return Err(BuildError::Validation(format!(
                    "malformed coordinate '{coordinate}', expected group:artifact:version[:classifier]"
                )));
            }
        };
        if [group, artifact, version].iter().any(|p| p.is_empty()) {
            return Err(BuildError::Validation(format!(
                "malformed coordinate '{coordinate}'"
            )));
        }

        let file_name = match classifier.or(declared) {
            Some(c) => format!("{artifact}-{version}-{c}.jar"),
            None => format!("{artifact}-{version}.jar"),
        };
        Ok(self
            .root
            .join(group.replace('.', "/"))
            .join(artifact)
            .join(version)
            .join(file_name))
    }

    fn collect(
        &self,
        group: &DependencyGroup,
        request: &ResolveRequest<'_>,
        visited: &mut HashSet<String>,
        seen: &mut HashSet<PathBuf>,
        out: &mut Vec<PathBuf>,
    ) -> Result<()> {
        if !visited.insert(group.name.clone()) {
            return Ok(());
        }

        for coordinate in &group.artifacts {
            let path = self.artifact_path(coordinate, None)?;
            if !path.is_file() {
                return Err(BuildError::Unresolved {
                    coordinate: coordinate.clone(),
                    path,
                });
            }
            if seen.insert(path.clone()) {
                out.push(path);
            }

            if request.fetch_sources {
                let sources = self.artifact_path(coordinate, Some("sources"))?;
                if sources.is_file() {
                    if seen.insert(sources.clone()) {
                        out.push(sources);
                    }
                } else {
                    log::debug!("no sources archive for {coordinate}");
                }
            }
        }

        if !(request.transitive && group.transitive) {
            return Ok(());
        }
        for included in &group.includes {
            if !request.scopes.is_empty() && !request.scopes.contains(included) {
                log::debug!(
                    "not following group '{included}' from '{}': outside {:?}",
                    group.name,
                    request.scopes
                );
                continue;
            }
            let next = self.group(included)?;
            self.collect(next, request, visited, seen, out)?;
        }
        Ok(())
    }
}

impl DependencyResolver for LocalRepository {
    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        self.collect(
            request.group,
            request,
            &mut HashSet::new(),
            &mut HashSet::new(),
            &mut out,
        )?;
        log::debug!(
            "resolved group '{}' to {} artifact(s)",
            request.group.name,
            out.len()
        );
        Ok(out)
    }
}
