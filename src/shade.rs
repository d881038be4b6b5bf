//! Dependency shading.
//!
//! Third-party classes are staged through private temporary directories,
//! renamed by an external rewriting tool (jarjar-style `rule <from> <to>`
//! directives) and installed into the project's class output:
//!
//! 1. collect the resolved artifacts into a staging directory
//! 2. explode every collected jar into one merged tree
//! 3. strip manifest and signature files from that tree
//! 4. repack the tree into an intermediate jar
//! 5. write the rules file and run the rewriter
//! 6. explode the rewritten jar into the output directory
//! 7. strip signing metadata from the output directory again
//!
//! Every staging directory and the rules file are owned by a [`Staging`]
//! value, so they are removed when a run ends whether it succeeded or not.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};

use crate::archive::{assemble, explode, strip_signing_metadata};
use crate::error::{BuildError, Result};
use crate::process::{ToolInvocation, ToolRunner};
use crate::resolve::{DependencyGroup, DependencyResolver, ResolveRequest};
use crate::scan::list_archives;

pub const REWRITER_LABEL: &str = "JarJar";

/// A namespace rewrite directive, e.g. `com.vendor.**` to `com.acme.shaded.@1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub from: String,
    pub to: String,
}

impl Rule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Result<Self> {
        let rule = Self {
            from: from.into(),
            to: to.into(),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |what: &str| {
            Err(BuildError::Validation(format!(
                "shading rule '{}' -> '{}' has {what}",
                self.from, self.to
            )))
        };
        if self.from.trim().is_empty() {
            return bad("an empty 'from' pattern");
        }
        if self.to.trim().is_empty() {
            return bad("an empty 'to' pattern");
        }
        if self.from.chars().chain(self.to.chars()).any(char::is_whitespace) {
            return bad("whitespace in a pattern");
        }
        Ok(())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule {} {}", self.from, self.to)
    }
}

/// Ordered, de-duplicated rules; renders the same file for any insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: BTreeSet<Rule>,
}

impl RuleSet {
    /// Validates every rule; nothing is collected if any rule is malformed.
    pub fn new<I: IntoIterator<Item = Rule>>(rules: I) -> Result<Self> {
        let rules: BTreeSet<Rule> = rules.into_iter().collect();
        for rule in &rules {
            rule.validate()?;
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn render(&self) -> String {
        self.rules.iter().map(|r| format!("{r}\n")).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Collected,
    Exploded,
    Filtered,
    Repackaged,
    Rewritten,
    Installed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Collected => "collect",
            PipelineStage::Exploded => "explode",
            PipelineStage::Filtered => "filter",
            PipelineStage::Repackaged => "repackage",
            PipelineStage::Rewritten => "rewrite",
            PipelineStage::Installed => "install",
        };
        f.write_str(name)
    }
}

/// How to call the rewriter: `program leading_args.. <rules> <in> <out>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteTool {
    pub program: PathBuf,
    pub leading_args: Vec<OsString>,
}

impl RewriteTool {
    /// `java -jar <jarjar.jar> process <rules> <in> <out>`.
    pub fn jarjar(java: impl Into<PathBuf>, jarjar_jar: impl Into<PathBuf>) -> Self {
        let jar: PathBuf = jarjar_jar.into();
        Self {
            program: java.into(),
            leading_args: vec!["-jar".into(), jar.into_os_string(), "process".into()],
        }
    }

    pub fn executable(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    fn invocation(&self, rules: &Path, input: &Path, output: &Path) -> ToolInvocation {
        let mut invocation = ToolInvocation::new(REWRITER_LABEL, &self.program);
        invocation
            .args(&self.leading_args)
            .arg(rules)
            .arg(input)
            .arg(output);
        invocation
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShadeReport {
    pub group: String,
    pub artifacts: usize,
    pub rules: usize,
    pub installed_files: usize,
    pub output_dir: String,
}

/// Private scratch space for one run. Dropping it removes everything.
struct Staging {
    collected: TempDir,
    exploded: TempDir,
    repackaged: TempDir,
    rules_file: NamedTempFile,
}

impl Staging {
    fn allocate(base: Option<&Path>) -> Result<Self> {
        let dir = |label: &str| -> Result<TempDir> {
            let prefix = format!("jarwright-shade-{label}-");
            let mut builder = tempfile::Builder::new();
            builder.prefix(&prefix);
            let created = match base {
                Some(base) => builder.tempdir_in(base),
                None => builder.tempdir(),
            };
            created.map_err(BuildError::io(format!("failed to create {label} staging directory")))
        };
        let collected = dir("collected")?;
        let exploded = dir("exploded")?;
        let repackaged = dir("repackaged")?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("jarwright-shade-").suffix(".rules");
        let rules_file = match base {
            Some(base) => builder.tempfile_in(base),
            None => builder.tempfile(),
        }
        .map_err(BuildError::io("failed to create rules file"))?;

        Ok(Self {
            collected,
            exploded,
            repackaged,
            rules_file,
        })
    }

    fn release(self) {
        let Staging {
            collected,
            exploded,
            repackaged,
            rules_file,
        } = self;
        for dir in [collected, exploded, repackaged] {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                log::debug!("ignoring cleanup failure for {}: {e}", path.display());
            }
        }
        if let Err(e) = rules_file.close() {
            log::debug!("ignoring cleanup failure for rules file: {e}");
        }
    }
}

pub struct ShadingPipeline<'a> {
    resolver: &'a dyn DependencyResolver,
    runner: &'a dyn ToolRunner,
    rewriter: RewriteTool,
    scopes: Vec<String>,
    temp_root: Option<PathBuf>,
}

impl<'a> ShadingPipeline<'a> {
    pub fn new(
        resolver: &'a dyn DependencyResolver,
        runner: &'a dyn ToolRunner,
        rewriter: RewriteTool,
    ) -> Self {
        Self {
            resolver,
            runner,
            rewriter,
            scopes: vec!["compile".to_string(), "runtime".to_string()],
            temp_root: None,
        }
    }

    /// Group names followed when collecting transitively.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Allocates staging directories under `root` instead of the system temp dir.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    pub fn shade(
        &self,
        group: &DependencyGroup,
        rules: &[Rule],
        output_dir: &Path,
    ) -> Result<ShadeReport> {
        let rules = RuleSet::new(rules.iter().cloned())?;
        if rules.is_empty() {
            return Err(BuildError::Validation(format!(
                "no shading rules declared for group '{}'",
                group.name
            )));
        }
        if output_dir.as_os_str().is_empty() {
            return Err(BuildError::Validation(
                "shading output directory is empty".to_string(),
            ));
        }

        let staging = Staging::allocate(self.temp_root.as_deref())?;
        let result = self.run_stages(&staging, group, &rules, output_dir);
        staging.release();
        result
    }

    fn run_stages(
        &self,
        staging: &Staging,
        group: &DependencyGroup,
        rules: &RuleSet,
        output_dir: &Path,
    ) -> Result<ShadeReport> {
        let artifacts = self
            .collect(group, staging.collected.path())
            .map_err(|e| e.in_stage(PipelineStage::Collected))?;
        log::info!(
            "shade[{}]: collected {} artifact(s)",
            group.name,
            artifacts
        );

        let exploded = self
            .explode_all(staging.collected.path(), staging.exploded.path())
            .map_err(|e| e.in_stage(PipelineStage::Exploded))?;
        log::info!("shade[{}]: exploded {} file(s)", group.name, exploded);

        let stripped = strip_signing_metadata(staging.exploded.path())
            .map_err(|e| e.in_stage(PipelineStage::Filtered))?;
        log::debug!(
            "shade[{}]: removed {} metadata file(s)",
            group.name,
            stripped.len()
        );

        let intermediate = staging.repackaged.path().join("intermediate.jar");
        assemble(&intermediate, &[staging.exploded.path().to_path_buf()], None)
            .map_err(|e| e.in_stage(PipelineStage::Repackaged))?;

        let rewritten = staging.repackaged.path().join("rewritten.jar");
        self.rewrite(staging.rules_file.path(), rules, &intermediate, &rewritten)
            .map_err(|e| e.in_stage(PipelineStage::Rewritten))?;
        log::info!("shade[{}]: applied {} rule(s)", group.name, rules.len());

        let installed =
            explode(&rewritten, output_dir).map_err(|e| e.in_stage(PipelineStage::Installed))?;

        match strip_signing_metadata(output_dir) {
            Ok(removed) if !removed.is_empty() => log::debug!(
                "shade[{}]: removed {} metadata file(s) from {}",
                group.name,
                removed.len(),
                output_dir.display()
            ),
            Ok(_) => {}
            Err(e) => log::warn!(
                "shade[{}]: could not clean metadata in {}: {e}",
                group.name,
                output_dir.display()
            ),
        }

        Ok(ShadeReport {
            group: group.name.clone(),
            artifacts,
            rules: rules.len(),
            installed_files: installed,
            output_dir: output_dir.to_string_lossy().to_string(),
        })
    }

    fn collect(&self, group: &DependencyGroup, dest: &Path) -> Result<usize> {
        let resolved = self.resolver.resolve(&ResolveRequest {
            group,
            transitive: true,
            scopes: &self.scopes,
            fetch_sources: false,
        })?;

        // Same-named jars from different groups must not overwrite each other;
        // the index prefix also keeps resolution order for the explode stage.
        for (index, artifact) in resolved.iter().enumerate() {
            let name = artifact.file_name().ok_or_else(|| {
                BuildError::Validation(format!("artifact path {} has no file name", artifact.display()))
            })?;
            let target = dest.join(format!("{index:04}-{}", name.to_string_lossy()));
            std::fs::copy(artifact, &target).map_err(BuildError::io(format!(
                "failed to copy {} into staging",
                artifact.display()
            )))?;
        }
        Ok(resolved.len())
    }

    fn explode_all(&self, collected: &Path, dest: &Path) -> Result<usize> {
        let mut total = 0usize;
        for archive in list_archives(collected)? {
            total += explode(&archive, dest)?;
        }
        Ok(total)
    }

    fn rewrite(
        &self,
        rules_path: &Path,
        rules: &RuleSet,
        input: &Path,
        output: &Path,
    ) -> Result<()> {
        let mut file = std::fs::File::create(rules_path)
            .map_err(BuildError::io(format!("failed to open {}", rules_path.display())))?;
        file.write_all(rules.render().as_bytes())
            .map_err(BuildError::io(format!("failed to write {}", rules_path.display())))?;
        drop(file);

        let invocation = self.rewriter.invocation(rules_path, input, output);
        self.runner
            .run(&invocation)?
            .check(REWRITER_LABEL, "class rewriting did not complete")?;

        if !output.is_file() {
            return Err(BuildError::ProcessFailure {
                tool: REWRITER_LABEL.to_string(),
                reason: format!("no output archive at {}", output.display()),
                code: Some(0),
                stderr: String::new(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ToolOutput;
    use std::cell::RefCell;

    struct NoArtifacts;

    impl DependencyResolver for NoArtifacts {
        fn resolve(&self, _request: &ResolveRequest<'_>) -> Result<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<ToolInvocation>>,
        rules_seen: RefCell<Option<String>>,
    }

    impl ToolRunner for Recorder {
        fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
            let rules = PathBuf::from(&invocation.args[invocation.args.len() - 3]);
            *self.rules_seen.borrow_mut() = std::fs::read_to_string(rules).ok();
            self.calls.borrow_mut().push(invocation.clone());
            Ok(ToolOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "rewrite exploded".to_string(),
            })
        }
    }

    fn remaining(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn rule_with_empty_side_is_rejected() {
        assert!(Rule::new("", "x").is_err());
        assert!(Rule::new("x", "").is_err());
        assert!(Rule::new("com.a.**", "com b.@1").is_err());
        assert!(Rule::new("com.a.**", "com.b.@1").is_ok());
    }

    #[test]
    fn rules_file_is_independent_of_insertion_order() {
        let a = Rule::new("org.b.**", "x.b.@1").unwrap();
        let b = Rule::new("org.a.**", "x.a.@1").unwrap();
        let one = RuleSet::new(vec![a.clone(), b.clone()]).unwrap();
        let two = RuleSet::new(vec![b.clone(), a.clone(), b]).unwrap();

        assert_eq!(one.render(), two.render());
        assert_eq!(
            one.render(),
            "rule org.a.** x.a.@1\nrule org.b.** x.b.@1\n"
        );
    }

    #[test]
    fn invalid_rule_fails_before_any_staging() {
        let temp_root = tempfile::tempdir().unwrap();
        let runner = Recorder::default();
        let pipeline = ShadingPipeline::new(&NoArtifacts, &runner, RewriteTool::executable("jarjar"))
            .with_temp_root(temp_root.path());

        let rules = vec![Rule {
            from: String::new(),
            to: "x".to_string(),
        }];
        let output = temp_root.path().join("classes");
        let err = pipeline
            .shade(&DependencyGroup::new("shaded-libs"), &rules, &output)
            .unwrap_err();

        assert!(matches!(err, BuildError::Validation(_)));
        assert_eq!(remaining(temp_root.path()), 0);
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn rewrite_failure_still_removes_staging() {
        let temp_root = tempfile::tempdir().unwrap();
        let output_root = tempfile::tempdir().unwrap();
        let runner = Recorder::default();
        let pipeline = ShadingPipeline::new(
            &NoArtifacts,
            &runner,
            RewriteTool::jarjar("java", "/tools/jarjar.jar"),
        )
        .with_temp_root(temp_root.path());

        let rules = vec![Rule::new("com.vendor.**", "com.acme.shaded.@1").unwrap()];
        let err = pipeline
            .shade(
                &DependencyGroup::new("shaded-libs"),
                &rules,
                &output_root.path().join("classes"),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            BuildError::Stage {
                stage: PipelineStage::Rewritten,
                ..
            }
        ));
        let message = err.to_string();
        assert!(message.contains("JarJar failed"), "{message}");
        assert!(message.contains("rewrite exploded"), "{message}");
        assert_eq!(remaining(temp_root.path()), 0);

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].args[..3],
            [
                OsString::from("-jar"),
                OsString::from("/tools/jarjar.jar"),
                OsString::from("process"),
            ]
        );
        assert_eq!(
            runner.rules_seen.borrow().as_deref(),
            Some("rule com.vendor.** com.acme.shaded.@1\n")
        );
    }
}
