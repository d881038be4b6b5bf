//! Project configuration (`jarwright.toml`) and JDK tool lookup.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::error::{BuildError, Result};
use crate::process::{find_on_path, is_executable};
use crate::resolve::{DependencyGroup, LocalRepository};
use crate::scan::default_local_repository;
use crate::shade::{RewriteTool, Rule};

pub const CONFIG_FILE: &str = "jarwright.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub project: ProjectSection,
    pub layout: Layout,
    pub tools: ToolsConfig,
    pub compile: CompileConfig,
    pub doc: DocConfig,
    pub groups: BTreeMap<String, DependencyGroup>,
    pub shade: Option<ShadeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectSection {
    pub name: String,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: "project".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Layout {
    pub source: PathBuf,
    pub test_source: PathBuf,
    pub resources: PathBuf,
    pub output: PathBuf,
    pub test_output: PathBuf,
    pub docs: PathBuf,
    pub jar: Option<PathBuf>,
    pub source_jar: Option<PathBuf>,
    pub lib_dirs: Vec<PathBuf>,
    pub repository: Option<PathBuf>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            source: PathBuf::from("src/main/java"),
            test_source: PathBuf::from("src/test/java"),
            resources: PathBuf::from("src/main/resources"),
            output: PathBuf::from("target/classes"),
            test_output: PathBuf::from("target/test-classes"),
            docs: PathBuf::from("target/docs"),
            jar: None,
            source_jar: None,
            lib_dirs: vec![PathBuf::from("lib")],
            repository: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub java_version: String,
    pub javac: Option<PathBuf>,
    pub javadoc: Option<PathBuf>,
    pub java: Option<PathBuf>,
    /// Rewriter: a `.jar` is run through `java -jar`, anything else directly.
    pub jarjar: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            java_version: "default".to_string(),
            javac: None,
            javadoc: None,
            java: None,
            jarjar: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileConfig {
    pub flags: Vec<String>,
    pub groups: Vec<String>,
    pub test_groups: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocConfig {
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShadeConfig {
    pub group: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_scopes() -> Vec<String> {
    vec!["compile".to_string(), "runtime".to_string()]
}

impl ProjectConfig {
    /// Reads `path`, or returns defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(BuildError::io(format!("failed to read {}", path.display())))?;
        Self::parse(&text).map_err(|e| match e {
            BuildError::Validation(msg) => {
                BuildError::Validation(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut config: ProjectConfig =
            toml::from_str(text).map_err(|e| BuildError::Validation(e.to_string()))?;
        for (name, group) in config.groups.iter_mut() {
            group.name = name.clone();
        }
        config.check_group_references()?;
        Ok(config)
    }

    fn check_group_references(&self) -> Result<()> {
        let referenced = self
            .compile
            .groups
            .iter()
            .chain(&self.compile.test_groups)
            .chain(self.shade.iter().map(|s| &s.group))
            .chain(self.groups.values().flat_map(|g| &g.includes));
        for name in referenced {
            if !self.groups.contains_key(name) {
                return Err(BuildError::Validation(format!(
                    "dependency group '{name}' is referenced but not declared"
                )));
            }
        }
        if let Some(shade) = &self.shade {
            for rule in &shade.rules {
                rule.validate()?;
            }
        }
        Ok(())
    }

    pub fn repository(&self, project_root: &Path) -> Result<LocalRepository> {
        let root = match &self.layout.repository {
            Some(p) => project_root.join(p),
            None => default_local_repository()?,
        };
        Ok(LocalRepository::new(root, self.groups.clone()))
    }

    pub fn groups_named(&self, names: &[String]) -> Result<Vec<&DependencyGroup>> {
        names
            .iter()
            .map(|n| {
                self.groups.get(n).ok_or_else(|| {
                    BuildError::Validation(format!("unknown dependency group '{n}'"))
                })
            })
            .collect()
    }

    pub fn jar_path(&self, project_root: &Path) -> PathBuf {
        let default = PathBuf::from("target").join(format!("{}.jar", self.project.name));
        project_root.join(self.layout.jar.clone().unwrap_or(default))
    }

    pub fn source_jar_path(&self, project_root: &Path) -> PathBuf {
        let default = PathBuf::from("target").join(format!("{}-sources.jar", self.project.name));
        project_root.join(self.layout.source_jar.clone().unwrap_or(default))
    }
}

/// A JDK executable the build may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JdkTool {
    Javac,
    Javadoc,
    Java,
}

impl JdkTool {
    pub fn name(self) -> &'static str {
        match self {
            JdkTool::Javac => "javac",
            JdkTool::Javadoc => "javadoc",
            JdkTool::Java => "java",
        }
    }

    fn configured(self, tools: &ToolsConfig) -> Option<&PathBuf> {
        match self {
            JdkTool::Javac => tools.javac.as_ref(),
            JdkTool::Javadoc => tools.javadoc.as_ref(),
            JdkTool::Java => tools.java.as_ref(),
        }
    }
}

type ToolCache = Mutex<HashMap<(String, JdkTool), PathBuf>>;

fn located_tools() -> &'static ToolCache {
    static CACHE: OnceLock<ToolCache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// JDK lookup for `tools.java_version`. Each tool is resolved only when a
/// command asks for it, so `doc` never needs `javac` to be installed.
#[derive(Debug, Clone, Copy)]
pub struct Toolchain<'a> {
    tools: &'a ToolsConfig,
}

impl<'a> Toolchain<'a> {
    pub fn new(tools: &'a ToolsConfig) -> Self {
        Self { tools }
    }

    pub fn version(&self) -> &str {
        &self.tools.java_version
    }

    /// Resolves `tool` from the process environment. Environment lookups
    /// are cached per version for the life of the process.
    pub fn tool(&self, tool: JdkTool) -> Result<PathBuf> {
        if let Some(path) = tool.configured(self.tools) {
            return require_executable(tool.name(), path);
        }
        let key = (self.tools.java_version.clone(), tool);
        let mut cache = located_tools()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(found) = cache.get(&key) {
            return Ok(found.clone());
        }
        let located = self.locate(tool, |key| std::env::var_os(key))?;
        log::debug!(
            "java toolchain '{}': {} resolved to {}",
            self.version(),
            tool.name(),
            located.display()
        );
        cache.insert(key, located.clone());
        Ok(located)
    }

    /// Lookup order: explicit path, `JARWRIGHT_JAVA_HOME_<version>`,
    /// `JAVA_HOME`, then `PATH`.
    pub fn locate(&self, tool: JdkTool, env: impl Fn(&str) -> Option<OsString>) -> Result<PathBuf> {
        let name = tool.name();
        if let Some(path) = tool.configured(self.tools) {
            return require_executable(name, path);
        }

        let versioned_key = format!(
            "JARWRIGHT_JAVA_HOME_{}",
            self.tools.java_version.to_ascii_uppercase().replace(['.', '-'], "_")
        );
        let home = env(&versioned_key).or_else(|| env("JAVA_HOME")).map(PathBuf::from);
        if let Some(home) = &home {
            let candidate = home.join("bin").join(exe_name(name));
            if is_executable(&candidate) {
                return Ok(candidate);
            }
        }
        find_on_path(name, env("PATH").as_deref()).ok_or_else(|| BuildError::Configuration {
            tool: name.to_string(),
            reason: format!(
                "not found via {versioned_key}, JAVA_HOME or PATH; set tools.{name} in {CONFIG_FILE}"
            ),
        })
    }
}

fn exe_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

fn require_executable(tool: &str, path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(BuildError::Configuration {
            tool: tool.to_string(),
            reason: format!("{} does not exist", path.display()),
        });
    }
    if !is_executable(path) {
        return Err(BuildError::Configuration {
            tool: tool.to_string(),
            reason: format!("{} is not executable", path.display()),
        });
    }
    Ok(path.to_path_buf())
}

/// Builds the rewriter invocation from `tools.jarjar`, checking it exists.
/// `java` is only looked up when the rewriter is a `.jar`.
pub fn rewrite_tool(
    tools: &ToolsConfig,
    project_root: &Path,
    toolchain: &Toolchain<'_>,
) -> Result<RewriteTool> {
    let configured = tools.jarjar.as_ref().ok_or_else(|| BuildError::Configuration {
        tool: "jarjar".to_string(),
        reason: format!("tools.jarjar is not set in {CONFIG_FILE}"),
    })?;
    let path = project_root.join(configured);
    if path.extension().is_some_and(|e| e == "jar") {
        if !path.is_file() {
            return Err(BuildError::Configuration {
                tool: "jarjar".to_string(),
                reason: format!("{} does not exist", path.display()),
            });
        }
        Ok(RewriteTool::jarjar(toolchain.tool(JdkTool::Java)?, path))
    } else {
        Ok(RewriteTool::executable(require_executable("jarjar", &path)?))
    }
}
