//! Error taxonomy shared by every build step.
//!
//! All fatal conditions surface as a single [`BuildError`] carrying a
//! descriptive message; the binary wraps it in `anyhow` for display.

use std::path::PathBuf;
use thiserror::Error;

use crate::shade::PipelineStage;

pub type Result<T> = std::result::Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    /// A required external tool is missing, not found or not executable.
    #[error("{tool} is not usable: {reason}")]
    Configuration { tool: String, reason: String },

    /// Malformed rules, arguments or archive contents, caught before work starts.
    #[error("invalid input: {0}")]
    Validation(String),

    /// An external tool ran but exited unsuccessfully.
    #[error("{tool} failed: {reason}{}", render_stderr(.stderr))]
    ProcessFailure {
        tool: String,
        reason: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bad archive {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// A declared artifact is absent from the local repository.
    #[error("cannot resolve {coordinate}: {} does not exist", .path.display())]
    Unresolved { coordinate: String, path: PathBuf },

    #[error("shading failed during {stage} stage: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: Box<BuildError>,
    },
}

impl BuildError {
    /// Builds a `map_err` adapter attaching `context` to an I/O error.
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> BuildError {
        let context = context.into();
        move |source| BuildError::Io { context, source }
    }

    pub fn archive(path: impl Into<PathBuf>) -> impl FnOnce(zip::result::ZipError) -> BuildError {
        let path = path.into();
        move |source| BuildError::Archive { path, source }
    }

    pub fn in_stage(self, stage: PipelineStage) -> BuildError {
        match self {
            already @ BuildError::Stage { .. } => already,
            other => BuildError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }
}

fn render_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" ({trimmed})")
    }
}
