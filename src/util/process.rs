//! Subprocess execution utilities.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

/// Builder for subprocess execution.
///
/// Used for one-shot tools (bundler, `initdb`) through [`ProcessBuilder::exec_with_timeout`]
/// and for supervised children through [`ProcessBuilder::to_tokio_command`].
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
}

/// Captured output of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Stdout and stderr joined, stderr last.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Get the program path.
    pub fn get_program(&self) -> &Path {
        &self.program
    }

    /// Get the arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Get the configured environment overrides.
    pub fn get_envs(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    /// Build an async command for a long-lived child.
    ///
    /// Stdout and stderr are piped so the supervisor can forward them;
    /// the child is killed when its handle is dropped.
    pub fn to_tokio_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::from(self.build_command());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Execute the command, killing it if it outlives `timeout`.
    pub fn exec_with_timeout(&self, timeout: Duration) -> Result<ProcessOutput> {
        let mut cmd = self.build_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.program.display()))?;

        // Drain pipes on separate threads so a chatty child can't fill the pipe and stall.
        let stdout = child.stdout.take().map(drain_pipe);
        let stderr = child.stderr.take().map(drain_pipe);

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("failed to wait for `{}`", self.program.display()))?
            {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                bail!(
                    "`{}` did not finish within {}s and was killed",
                    self.display_command(),
                    timeout.as_secs()
                );
            }
            std::thread::sleep(Duration::from_millis(20));
        };

        Ok(ProcessOutput {
            status,
            stdout: stdout.map(join_pipe).unwrap_or_default(),
            stderr: stderr.map(join_pipe).unwrap_or_default(),
        })
    }

    /// Execute and require success.
    pub fn exec_and_check(&self, timeout: Duration) -> Result<ProcessOutput> {
        let output = self.exec_with_timeout(timeout)?;
        if !output.success() {
            bail!(
                "`{}` failed with exit code {:?}\n{}",
                self.display_command(),
                output.status.code(),
                output.stderr
            );
        }
        Ok(output)
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

fn drain_pipe<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_pipe(handle: std::thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Resolve a tool from an explicit override or PATH.
///
/// Also looks in `node_modules/.bin` under `project_dir`, where workbook
/// templates install esbuild and wrangler.
pub fn resolve_tool(name: &str, configured: Option<&Path>, project_dir: &Path) -> Result<PathBuf> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }

    let local = project_dir.join("node_modules").join(".bin").join(name);
    if local.is_file() {
        return Ok(local);
    }

    find_executable(name).with_context(|| {
        format!(
            "could not find `{}` in PATH or {}",
            name,
            project_dir.join("node_modules/.bin").display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_captures_output() {
        let output = ProcessBuilder::new("echo")
            .arg("hello")
            .exec_with_timeout(Duration::from_secs(5))
            .unwrap();

        assert!(output.success());
        assert!(output.stdout.contains("hello"));
    }

    #[test]
    fn test_exec_times_out() {
        let err = ProcessBuilder::new("sleep")
            .arg("5")
            .exec_with_timeout(Duration::from_millis(100))
            .unwrap_err();

        assert!(err.to_string().contains("did not finish"));
    }

    #[test]
    fn test_display_command() {
        let pb = ProcessBuilder::new("esbuild").args(["--bundle", "entry.js"]);
        assert_eq!(pb.display_command(), "esbuild --bundle entry.js");
    }

    #[test]
    fn test_resolve_tool_prefers_override() {
        let tmp = tempfile::TempDir::new().unwrap();
        let configured = PathBuf::from("/opt/esbuild");
        let resolved = resolve_tool("esbuild", Some(&configured), tmp.path()).unwrap();
        assert_eq!(resolved, configured);
    }

    #[test]
    fn test_resolve_tool_checks_node_modules() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bin = tmp.path().join("node_modules/.bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("hands-test-tool"), "").unwrap();

        let resolved = resolve_tool("hands-test-tool", None, tmp.path()).unwrap();
        assert_eq!(resolved, bin.join("hands-test-tool"));
    }
}
