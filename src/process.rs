//! Centralized command execution with consistent error handling.
//!
//! All external commands go through this module so stdout/stderr are
//! always captured and failures carry useful messages. A non-zero exit
//! code is not an error here: callers read it from [`CommandResult`].
//! Only launch failures and timeouts surface as [`ExecError`].

use anyhow::{bail, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Polling interval while waiting on a child with a deadline.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Failure to produce an exit code at all.
///
/// Distinct from a command that ran and exited non-zero: that is reported
/// through [`CommandResult::code`], never as an error.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to launch '{program}': {source}. Is it installed?")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

impl ExecError {
    /// True for wall-clock timeout, as opposed to a launch/wait failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }
}

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout, lossily decoded.
    pub stdout: String,
    /// Captured stderr, lossily decoded.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<std::path::PathBuf>,
    envs: Vec<(String, String)>,
    timeout: Option<Duration>,
    /// Custom error message prefix for `run_checked`.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            timeout: None,
            error_prefix: None,
        }
    }

    /// Execute an existing script file directly, without a shell in front.
    ///
    /// The file must be executable; the kernel dispatches on its shebang.
    pub fn script(path: &Path) -> Self {
        Self::new(path.to_string_lossy())
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.envs
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Kill the child and report [`ExecError::Timeout`] after this long.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a custom error message prefix for `run_checked`.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    /// Run the command and capture output.
    ///
    /// A non-zero exit code is a normal result, not an error.
    pub fn run(self) -> std::result::Result<CommandResult, ExecError> {
        match self.timeout {
            None => self.run_plain(),
            Some(timeout) => self.run_with_deadline(timeout),
        }
    }

    /// Run the command; bail with the captured stderr on non-zero exit.
    ///
    /// For callers where a failed command must abort the step (loop mount,
    /// special-filesystem binds).
    pub fn run_checked(self) -> Result<CommandResult> {
        let prefix = self
            .error_prefix
            .clone()
            .unwrap_or_else(|| format!("'{}' failed", self.program));
        let result = self.run()?;

        if !result.success() {
            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }
        Ok(result)
    }

    fn run_plain(self) -> std::result::Result<CommandResult, ExecError> {
        let output = self.command().output().map_err(|source| ExecError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        Ok(CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Spawn, drain stdout/stderr on threads, and poll for exit until the
    /// deadline. On expiry the child is killed and its partial output
    /// discarded.
    fn run_with_deadline(self, timeout: Duration) -> std::result::Result<CommandResult, ExecError> {
        let mut child = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Readers run on their own threads so a chatty child can't fill a
        // pipe and deadlock against the wait loop below.
        let stdout = child.stdout.take().expect("child stdout is piped");
        let stderr = child.stderr.take().expect("child stderr is piped");
        let stdout_thread = thread::spawn(move || read_all(stdout));
        let stderr_thread = thread::spawn(move || read_all(stderr));

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() > timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ExecError::Timeout {
                            program: self.program,
                            timeout,
                        });
                    }
                    thread::sleep(WAIT_POLL_INTERVAL);
                }
                Err(source) => {
                    let _ = child.kill();
                    return Err(ExecError::Wait {
                        program: self.program,
                        source,
                    });
                }
            }
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();

        Ok(CommandResult {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

fn read_all(mut source: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = source.read_to_end(&mut buf);
    buf
}

// =============================================================================
// Convenience functions
// =============================================================================

/// Run a command with arguments.
///
/// # Example
/// ```ignore
/// let result = run("ls", ["-la", "/tmp"])?;
/// println!("Files:\n{}", result.stdout);
/// ```
pub fn run<I, S>(program: &str, args: I) -> std::result::Result<CommandResult, ExecError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut cmd = Cmd::new(program);
    for arg in args {
        cmd = cmd.arg(arg);
    }
    cmd.run()
}

/// Run a shell one-liner via `sh -c`.
///
/// # Example
/// ```ignore
/// let result = shell("echo hello && echo world")?;
/// ```
pub fn shell(command: &str) -> std::result::Result<CommandResult, ExecError> {
    run("sh", ["-c", command])
}

/// Check if a program exists in PATH.
pub fn exists(program: &str) -> bool {
    which::which(program).is_ok()
}

// =============================================================================
// Tests
// =============================================================================
