//! One way of running external tools.
//!
//! The compiler, the doc generator and the class rewriter all go through
//! [`ToolRunner`]. [`SystemRunner`] drains stdout and stderr on their own
//! threads while waiting, so a chatty child cannot block on a full pipe.

use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{BuildError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Short label used in messages, e.g. `javac`.
    pub tool: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for a in args {
            self.arg(a);
        }
        self
    }

    pub fn current_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn display_args(&self) -> String {
        self.args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Converts a non-zero exit into [`BuildError::ProcessFailure`].
    pub fn check(self, tool: &str, reason: &str) -> Result<ToolOutput> {
        if self.success() {
            return Ok(self);
        }
        Err(BuildError::ProcessFailure {
            tool: tool.to_string(),
            reason: match self.code {
                Some(code) => format!("{reason} (exit code {code})"),
                None => format!("{reason} (terminated by signal)"),
            },
            code: self.code,
            stderr: self.stderr,
        })
    }
}

pub trait ToolRunner {
    /// Runs the invocation to completion. A non-zero exit is reported in the
    /// output, not as an error; spawn and I/O problems are errors.
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        log::info!(
            "running {} {}",
            invocation.program.display(),
            invocation.display_args()
        );

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BuildError::Configuration {
                    tool: invocation.tool.clone(),
                    reason: format!("{} not found", invocation.program.display()),
                }
            } else {
                BuildError::Io {
                    context: format!("failed to start {}", invocation.tool),
                    source: e,
                }
            }
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let tool = invocation.tool.as_str();

        let (stdout, stderr) = std::thread::scope(|scope| {
            let err_reader = scope.spawn(move || drain(stderr, tool, log::Level::Warn));
            let out = drain(stdout, tool, log::Level::Info);
            let err = err_reader.join().unwrap_or_default();
            (out, err)
        });

        let status = child
            .wait()
            .map_err(BuildError::io(format!("failed to wait for {}", invocation.tool)))?;

        Ok(ToolOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn drain<R: Read>(stream: Option<R>, tool: &str, level: log::Level) -> String {
    let Some(stream) = stream else {
        return String::new();
    };
    let mut collected = String::new();
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Err(e) => {
                // Keep the pipe empty so the child can still run to exit.
                log::warn!("[{tool}] output unreadable, discarding the rest: {e}");
                if let Err(e) = std::io::copy(&mut reader, &mut std::io::sink()) {
                    log::debug!("[{tool}] discarding output failed: {e}");
                }
                break;
            }
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                log::log!(level, "[{tool}] {}", text.trim_end());
                collected.push_str(&text);
            }
        }
    }
    collected
}

/// Finds an executable named `name` in the directories of `PATH`.
pub fn find_on_path(name: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let path_var = path_var?;
    std::env::split_paths(path_var)
        .flat_map(|dir| executable_candidates(&dir, name))
        .find(|candidate| is_executable(candidate))
}

fn executable_candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![dir.join(format!("{name}.exe")), dir.join(name)]
    } else {
        vec![dir.join(name)]
    }
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn captures_both_streams_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(
            dir.path(),
            "tool.sh",
            "#!/bin/sh\necho \"args: $*\"\necho \"boom\" >&2\nexit 3\n",
        );

        let mut invocation = ToolInvocation::new("fake", &tool);
        invocation.args(["-d", "out"]);
        let output = SystemRunner.run(&invocation).unwrap();

        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "args: -d out\n");
        assert_eq!(output.stderr, "boom\n");

        let err = output.check("fake", "compilation failed").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("compilation failed"));
        assert!(message.contains("boom"));
    }

    #[test]
    fn large_output_on_both_streams_does_not_deadlock() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(
            dir.path(),
            "chatty.sh",
            "#!/bin/sh\ni=0\nwhile [ $i -lt 5000 ]; do\n  echo \"stdout line $i padding padding padding\"\n  echo \"stderr line $i padding padding padding\" >&2\n  i=$((i+1))\ndone\n",
        );

        let output = SystemRunner.run(&ToolInvocation::new("chatty", &tool)).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.lines().count(), 5000);
        assert_eq!(output.stderr.lines().count(), 5000);
    }

    #[test]
    fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "pwd.sh", "#!/bin/sh\npwd\n");
        let work = dir.path().join("work");
        fs::create_dir_all(&work).unwrap();

        let mut invocation = ToolInvocation::new("pwd", &tool);
        invocation.current_dir(&work);
        let output = SystemRunner.run(&invocation).unwrap();
        assert_eq!(
            PathBuf::from(output.stdout.trim()).canonicalize().unwrap(),
            work.canonicalize().unwrap()
        );
    }

    #[test]
    fn missing_program_is_a_configuration_error() {
        let err = SystemRunner
            .run(&ToolInvocation::new("javac", "/definitely/not/here/javac"))
            .unwrap_err();
        assert!(matches!(err, BuildError::Configuration { .. }));
    }

    #[test]
    fn find_on_path_skips_non_executables() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        let bin = dir.path().join("bin");
        fs::create_dir_all(&plain).unwrap();
        fs::create_dir_all(&bin).unwrap();
        fs::write(plain.join("javac"), "not executable").unwrap();
        let exe = script(&bin, "javac", "#!/bin/sh\n");

        let path_var = std::env::join_paths([&plain, &bin]).unwrap();
        assert_eq!(find_on_path("javac", Some(&path_var)), Some(exe));
        assert_eq!(find_on_path("javadoc", Some(&path_var)), None);
    }

    struct FailsOnce {
        failed: bool,
        data: std::io::Cursor<Vec<u8>>,
    }

    impl Read for FailsOnce {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.failed {
                self.failed = true;
                return Err(std::io::Error::other("transient"));
            }
            self.data.read(buf)
        }
    }

    #[test]
    fn read_error_still_drains_stream_to_eof() {
        let remaining = "line\n".repeat(10_000).into_bytes();
        let len = remaining.len() as u64;
        let mut stream = FailsOnce {
            failed: false,
            data: std::io::Cursor::new(remaining),
        };

        let collected = drain(Some(&mut stream), "fake", log::Level::Info);
        assert!(collected.is_empty());
        assert_eq!(stream.data.position(), len);
    }
}
