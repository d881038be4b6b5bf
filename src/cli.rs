use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "jarwright")]
#[command(about = "Incrementally compile, document, shade and package a Java project")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project root; relative layout paths are resolved against it.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub project: PathBuf,

    /// Defaults to `<project>/jarwright.toml`.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Compile stale sources.
    Compile {
        /// Compile test sources against the main output.
        #[arg(long)]
        test: bool,
    },
    /// Generate API documentation.
    Doc,
    /// Rewrite the configured dependency group into the class output.
    Shade,
    /// Print the composed classpath.
    Classpath {
        #[arg(long)]
        test: bool,

        #[arg(long, value_name = "PREFIX", default_value = "", allow_hyphen_values = true)]
        prefix: String,
    },
    /// Package classes and resources into the project jar.
    Jar,
    /// Package sources and resources into the sources jar.
    Sourcejar,
}
