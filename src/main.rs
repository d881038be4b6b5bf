use anyhow::{Context, Result};
use clap::Parser;
use jarwright::archive::{assemble, default_manifest};
use jarwright::classpath::ClasspathComposer;
use jarwright::cli::{Cli, Commands};
use jarwright::compile::{CompileRequest, Compiler};
use jarwright::config::{CONFIG_FILE, JdkTool, ProjectConfig, Toolchain, rewrite_tool};
use jarwright::process::SystemRunner;
use jarwright::resolve::LocalRepository;
use jarwright::shade::ShadingPipeline;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Serialize)]
struct ArchiveResult {
    archive: String,
    files: usize,
    duration_ms: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    // Tools run with the project as their working directory.
    let root = std::path::absolute(&cli.project)
        .with_context(|| format!("Failed to resolve {}", cli.project.display()))?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| root.join(CONFIG_FILE));
    let config = ProjectConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    match cli.command {
        Commands::Compile { test } => {
            let javac = Toolchain::new(&config.tools).tool(JdkTool::Javac)?;
            let repository = config.repository(&root)?;
            let compiler = compiler(&config, &root, &repository).with_javac(javac);
            let request = compile_request(&config, &root, test)?;
            eprintln!(
                "[jarwright] checking {} for stale sources",
                request.source_root.display()
            );
            let outcome = compiler.compile(&request)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Doc => {
            let javadoc = Toolchain::new(&config.tools).tool(JdkTool::Javadoc)?;
            let repository = config.repository(&root)?;
            let compiler = compiler(&config, &root, &repository).with_javadoc(javadoc);
            let mut request = compile_request(&config, &root, false)?;
            request.output_root = root.join(&config.layout.docs);
            let outcome = compiler.document(&request)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Shade => {
            let shade = config
                .shade
                .as_ref()
                .context("No [shade] section in project configuration")?;
            let rewriter = rewrite_tool(&config.tools, &root, &Toolchain::new(&config.tools))?;
            let repository = config.repository(&root)?;
            let group = repository.group(&shade.group)?;
            let output = root.join(&config.layout.output);

            eprintln!(
                "[jarwright] shading group '{}' into {}",
                shade.group,
                output.display()
            );
            let runner = SystemRunner;
            let pipeline = ShadingPipeline::new(&repository, &runner, rewriter)
                .with_scopes(shade.scopes.clone());
            let report = pipeline.shade(group, &shade.rules, &output)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Classpath { test, prefix } => {
            let repository = config.repository(&root)?;
            let composer = ClasspathComposer::new(&repository);
            let request = compile_request(&config, &root, test)?;
            let classpath = composer.compose(
                &request.dependency_groups,
                &request.library_dirs,
                &request.additional_classpath,
            )?;
            println!("{}", classpath.render(&prefix));
        }
        Commands::Jar => {
            let dirs = vec![
                root.join(&config.layout.output),
                root.join(&config.layout.resources),
            ];
            let result = package(&config.jar_path(&root), &dirs, Some(&default_manifest()))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Sourcejar => {
            let dirs = vec![
                root.join(&config.layout.source),
                root.join(&config.layout.resources),
            ];
            let result = package(&config.source_jar_path(&root), &dirs, None)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

fn compiler<'a>(
    config: &ProjectConfig,
    root: &Path,
    repository: &'a LocalRepository,
) -> Compiler<'a> {
    static RUNNER: SystemRunner = SystemRunner;
    Compiler::new(root, ClasspathComposer::new(repository), &RUNNER)
    .with_flags(config.compile.flags.clone())
    .with_doc_flags(config.doc.flags.clone())
}

fn compile_request<'c>(
    config: &'c ProjectConfig,
    root: &Path,
    test: bool,
) -> Result<CompileRequest<'c>> {
    let layout = &config.layout;
    let library_dirs: Vec<PathBuf> = layout.lib_dirs.iter().map(|d| root.join(d)).collect();

    if !test {
        return Ok(CompileRequest {
            source_root: root.join(&layout.source),
            output_root: root.join(&layout.output),
            dependency_groups: config.groups_named(&config.compile.groups)?,
            library_dirs,
            additional_classpath: Vec::new(),
        });
    }

    let mut groups = config.groups_named(&config.compile.groups)?;
    groups.extend(config.groups_named(&config.compile.test_groups)?);
    Ok(CompileRequest {
        source_root: root.join(&layout.test_source),
        output_root: root.join(&layout.test_output),
        dependency_groups: groups,
        library_dirs,
        additional_classpath: vec![root.join(&layout.output)],
    })
}

fn package(archive: &Path, dirs: &[PathBuf], manifest: Option<&str>) -> Result<ArchiveResult> {
    let start = Instant::now();
    eprintln!("[jarwright] writing {}", archive.display());
    let files = assemble(archive, dirs, manifest)?;
    Ok(ArchiveResult {
        archive: archive.to_string_lossy().to_string(),
        files,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}
