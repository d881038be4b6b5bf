use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::classpath::{Classpath, ClasspathComposer};
use crate::error::{BuildError, Result};
use crate::incremental::{ExtensionMapping, find_stale};
use crate::process::{ToolInvocation, ToolRunner};
use crate::resolve::DependencyGroup;
use crate::scan::{list_subdirectories, package_name};

/// Inputs for one compiler or doc-tool run.
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub source_root: PathBuf,
    pub output_root: PathBuf,
    pub dependency_groups: Vec<&'a DependencyGroup>,
    pub library_dirs: Vec<PathBuf>,
    /// Appended after every library, e.g. main classes when compiling tests.
    pub additional_classpath: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompileOutcome {
    Skipped { source_root: String },
    Compiled { files: usize, output_root: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DocOutcome {
    Skipped { source_root: String },
    Documented { packages: Vec<String>, output_root: String },
}

pub struct Compiler<'a> {
    javac: PathBuf,
    javadoc: PathBuf,
    flags: Vec<String>,
    doc_flags: Vec<String>,
    project_root: PathBuf,
    composer: ClasspathComposer<'a>,
    runner: &'a dyn ToolRunner,
}

impl<'a> Compiler<'a> {
    /// Tools default to `javac` and `javadoc` looked up on `PATH` at spawn.
    pub fn new(
        project_root: impl Into<PathBuf>,
        composer: ClasspathComposer<'a>,
        runner: &'a dyn ToolRunner,
    ) -> Self {
        Self {
            javac: PathBuf::from("javac"),
            javadoc: PathBuf::from("javadoc"),
            flags: Vec::new(),
            doc_flags: Vec::new(),
            project_root: project_root.into(),
            composer,
            runner,
        }
    }

    pub fn with_javac(mut self, javac: impl Into<PathBuf>) -> Self {
        self.javac = javac.into();
        self
    }

    pub fn with_javadoc(mut self, javadoc: impl Into<PathBuf>) -> Self {
        self.javadoc = javadoc.into();
        self
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_doc_flags(mut self, flags: Vec<String>) -> Self {
        self.doc_flags = flags;
        self
    }

    fn classpath(&self, request: &CompileRequest<'_>) -> Result<Classpath> {
        self.composer.compose(
            &request.dependency_groups,
            &request.library_dirs,
            &request.additional_classpath,
        )
    }

    /// Compiles only the stale sources. Nothing runs when every class file
    /// is newer than its source.
    pub fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutcome> {
        let project_root = absolute(&self.project_root)?;
        let source_root = absolute(&request.source_root)?;
        let output_root = absolute(&request.output_root)?;
        let mapping = ExtensionMapping::java_to_class();
        let stale = find_stale(
            &source_root,
            &output_root,
            mapping.source_extension(),
            &mapping,
        )?;

        if stale.is_empty() {
            log::info!(
                "{} is up to date, skipping compilation",
                source_root.display()
            );
            return Ok(CompileOutcome::Skipped {
                source_root: source_root.to_string_lossy().to_string(),
            });
        }

        std::fs::create_dir_all(&output_root).map_err(BuildError::io(format!(
            "failed to create {}",
            output_root.display()
        )))?;

        let classpath = self.classpath(request)?;
        let mut invocation = ToolInvocation::new("javac", &self.javac);
        invocation.current_dir(&project_root).args(&self.flags);
        if !classpath.is_empty() {
            invocation.arg("-classpath").arg(classpath.to_os_string()?);
        }
        invocation
            .arg("-sourcepath")
            .arg(&source_root)
            .arg("-d")
            .arg(&output_root)
            .args(&stale);

        log::info!("compiling {} stale source file(s)", stale.len());
        self.runner
            .run(&invocation)?
            .check("javac", "compilation failed")?;

        Ok(CompileOutcome::Compiled {
            files: stale.len(),
            output_root: output_root.to_string_lossy().to_string(),
        })
    }

    /// Runs the doc generator over every package directory of the source root.
    pub fn document(&self, request: &CompileRequest<'_>) -> Result<DocOutcome> {
        let project_root = absolute(&self.project_root)?;
        let source_root = absolute(&request.source_root)?;
        let output_root = absolute(&request.output_root)?;
        let packages = documentable_packages(&source_root)?;
        if packages.is_empty() {
            log::info!(
                "no packages under {}, skipping documentation",
                source_root.display()
            );
            return Ok(DocOutcome::Skipped {
                source_root: source_root.to_string_lossy().to_string(),
            });
        }

        std::fs::create_dir_all(&output_root).map_err(BuildError::io(format!(
            "failed to create {}",
            output_root.display()
        )))?;

        let classpath = self.classpath(request)?;
        let mut invocation = ToolInvocation::new("javadoc", &self.javadoc);
        invocation.current_dir(&project_root);
        if !classpath.is_empty() {
            invocation.arg("-classpath").arg(classpath.to_os_string()?);
        }
        invocation
            .args(&self.doc_flags)
            .arg("-sourcepath")
            .arg(&source_root)
            .arg("-d")
            .arg(&output_root)
            .args(&packages);

        self.runner
            .run(&invocation)?
            .check("javadoc", "documentation generation failed")?;

        Ok(DocOutcome::Documented {
            packages,
            output_root: output_root.to_string_lossy().to_string(),
        })
    }
}

/// The tool runs with the project root as its working directory, so every
/// path handed to it must not depend on the caller's directory.
fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(BuildError::io(format!(
        "failed to resolve {}",
        path.display()
    )))
}

pub fn documentable_packages(source_root: &Path) -> Result<Vec<String>> {
    Ok(list_subdirectories(source_root)?
        .iter()
        .map(|d| package_name(d))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ToolOutput;
    use crate::resolve::{DependencyResolver, ResolveRequest};
    use std::cell::RefCell;
    use std::ffi::OsString;

    struct FixedResolver;

    impl DependencyResolver for FixedResolver {
        fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Vec<PathBuf>> {
            Ok(request.group.artifacts.iter().map(PathBuf::from).collect())
        }
    }

    struct Recorder {
        code: i32,
        calls: RefCell<Vec<ToolInvocation>>,
    }

    impl Recorder {
        fn exiting(code: i32) -> Self {
            Self {
                code,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl ToolRunner for Recorder {
        fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
            self.calls.borrow_mut().push(invocation.clone());
            Ok(ToolOutput {
                code: Some(self.code),
                stdout: String::new(),
                stderr: if self.code == 0 {
                    String::new()
                } else {
                    "Broken.java:1: error".to_string()
                },
            })
        }
    }

    fn request<'g>(root: &Path, groups: Vec<&'g DependencyGroup>) -> CompileRequest<'g> {
        CompileRequest {
            source_root: root.join("src"),
            output_root: root.join("out"),
            dependency_groups: groups,
            library_dirs: Vec::new(),
            additional_classpath: Vec::new(),
        }
    }

    fn write(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "class X {}").unwrap();
    }

    #[test]
    fn empty_source_dir_never_invokes_compiler() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let runner = Recorder::exiting(0);
        let compiler = Compiler::new(
            dir.path(),
            ClasspathComposer::new(&FixedResolver),
            &runner,
        );

        let outcome = compiler.compile(&request(dir.path(), Vec::new())).unwrap();
        assert!(matches!(outcome, CompileOutcome::Skipped { .. }));
        assert!(runner.calls.borrow().is_empty());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn stale_files_are_passed_explicitly() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("src/com/acme/A.java"));
        write(&dir.path().join("src/com/acme/B.java"));

        let group = DependencyGroup::new("compile").with_artifacts(["/libs/a.jar"]);
        let runner = Recorder::exiting(0);
        let compiler = Compiler::new(
            dir.path(),
            ClasspathComposer::new(&FixedResolver),
            &runner,
        )
        .with_javac("/jdk/bin/javac")
        .with_flags(vec!["-g".to_string()]);

        let outcome = compiler.compile(&request(dir.path(), vec![&group])).unwrap();
        assert_eq!(
            outcome,
            CompileOutcome::Compiled {
                files: 2,
                output_root: dir.path().join("out").to_string_lossy().to_string(),
            }
        );
        assert!(dir.path().join("out").is_dir());

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.program, PathBuf::from("/jdk/bin/javac"));
        assert_eq!(call.working_dir.as_deref(), Some(dir.path()));
        let expected: Vec<OsString> = vec![
            "-g".into(),
            "-classpath".into(),
            "/libs/a.jar".into(),
            "-sourcepath".into(),
            dir.path().join("src").into(),
            "-d".into(),
            dir.path().join("out").into(),
            dir.path().join("src/com/acme/A.java").into(),
            dir.path().join("src/com/acme/B.java").into(),
        ];
        assert_eq!(call.args, expected);
    }

    #[test]
    fn nonzero_exit_is_compilation_failure() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("src/Broken.java"));
        let runner = Recorder::exiting(1);
        let compiler = Compiler::new(
            dir.path(),
            ClasspathComposer::new(&FixedResolver),
            &runner,
        );

        let err = compiler
            .compile(&request(dir.path(), Vec::new()))
            .unwrap_err();
        match &err {
            BuildError::ProcessFailure { tool, code, .. } => {
                assert_eq!(tool, "javac");
                assert_eq!(*code, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("compilation failed"));
    }

    #[test]
    fn document_lists_packages_after_classpath() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("src/com/acme/A.java"));

        let group = DependencyGroup::new("compile").with_artifacts(["/libs/a.jar"]);
        let runner = Recorder::exiting(0);
        let compiler = Compiler::new(
            dir.path(),
            ClasspathComposer::new(&FixedResolver),
            &runner,
        )
        .with_javadoc("/jdk/bin/javadoc")
        .with_doc_flags(vec!["-quiet".to_string()]);

        let mut req = request(dir.path(), vec![&group]);
        req.output_root = dir.path().join("docs");
        let outcome = compiler.document(&req).unwrap();
        assert!(matches!(
            &outcome,
            DocOutcome::Documented { packages, .. } if packages == &["com", "com.acme"]
        ));

        let calls = runner.calls.borrow();
        let args: Vec<String> = calls[0]
            .args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(&args[..4], &["-classpath", "/libs/a.jar", "-quiet", "-sourcepath"]);
        assert_eq!(&args[args.len() - 2..], &["com", "com.acme"]);
    }

    #[test]
    fn document_without_packages_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("src/Toplevel.java"));
        let runner = Recorder::exiting(0);
        let compiler = Compiler::new(
            dir.path(),
            ClasspathComposer::new(&FixedResolver),
            &runner,
        );
        let outcome = compiler.document(&request(dir.path(), Vec::new())).unwrap();
        assert!(matches!(outcome, DocOutcome::Skipped { .. }));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn relative_roots_are_absolutised_for_the_tool() {
        let cwd = std::env::current_dir().unwrap();
        let dir = tempfile::tempdir_in(&cwd).unwrap();
        let relative = dir.path().strip_prefix(&cwd).unwrap_or(dir.path()).to_path_buf();
        write(&relative.join("src/com/acme/A.java"));

        let runner = Recorder::exiting(0);
        let compiler = Compiler::new(
            &relative,
            ClasspathComposer::new(&FixedResolver),
            &runner,
        );
        compiler.compile(&request(&relative, Vec::new())).unwrap();

        let calls = runner.calls.borrow();
        let call = &calls[0];
        let working_dir = call.working_dir.as_deref().unwrap();
        assert!(working_dir.is_absolute());
        for arg in call.args.iter().filter(|a| *a != "-sourcepath" && *a != "-d") {
            let path = Path::new(arg);
            assert!(path.is_absolute(), "{} is relative", path.display());
        }
        let source = Path::new(call.args.last().unwrap());
        assert!(source.is_file());
        assert!(working_dir.join("src/com/acme/A.java").is_file());
    }
}
