//! # jarwright
//!
//! Build steps for small Java projects: incremental compilation, classpath
//! assembly, dependency shading and jar packaging. The actual compiler,
//! doc generator and class rewriter are external tools; this crate decides
//! what to feed them and cleans up after them.
//!
//! ## Architecture
//!
//! - **scan**: File tree walks producing timestamped file records
//! - **incremental**: Staleness detection by comparing source and class timestamps
//! - **resolve**: Dependency groups and the local repository resolver
//! - **classpath**: Ordered, de-duplicated classpath composition
//! - **process**: External tool invocation with concurrent stream draining
//! - **compile**: javac/javadoc orchestration with skip-when-up-to-date
//! - **archive**: Jar assembly, extraction and signature stripping
//! - **shade**: Multi-stage namespace rewriting of third-party classes
//! - **config**: `jarwright.toml` parsing and cached JDK tool lookup
//! - **error**: Error taxonomy shared by every step

pub mod archive;
pub mod classpath;
pub mod cli;
pub mod compile;
pub mod config;
pub mod error;
pub mod incremental;
pub mod process;
pub mod resolve;
pub mod scan;
pub mod shade;
