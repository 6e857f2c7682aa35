//! Script execution against a mounted rootfs, host-side or chrooted.
//!
//! Both execution modes produce the same [`ScriptOutcome`] shape, so the
//! pipeline never branches on how a script ran. A failing script is a
//! result, not an error: only being unable to read the script or to set
//! up the chroot environment aborts.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::chroot;
use crate::process::{Cmd, CommandResult, ExecError};

/// How a script run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStatus {
    /// Ran to completion; the exit code says whether it succeeded.
    Completed,
    /// Script file was empty, nothing executed.
    Skipped,
    /// Killed at the wall-clock limit; partial output discarded.
    TimedOut,
    /// The process never produced an exit code.
    LaunchFailed,
}

/// Uniform result of one script execution.
#[derive(Debug)]
pub struct ScriptOutcome {
    pub status: ScriptStatus,
    /// Exit code; -1 when no real code exists (timeout, launch failure).
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Execution-level error detail, `None` for plain exits.
    pub error: Option<String>,
}

impl ScriptOutcome {
    fn skipped() -> Self {
        Self {
            status: ScriptStatus::Skipped,
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        }
    }

    fn from_exec(result: std::result::Result<CommandResult, ExecError>) -> Self {
        match result {
            Ok(result) => Self {
                status: ScriptStatus::Completed,
                code: result.code(),
                stdout: result.stdout,
                stderr: result.stderr,
                error: None,
            },
            Err(err) => Self {
                status: if err.is_timeout() {
                    ScriptStatus::TimedOut
                } else {
                    ScriptStatus::LaunchFailed
                },
                code: -1,
                stdout: String::new(),
                stderr: String::new(),
                error: Some(err.to_string()),
            },
        }
    }

    /// True when the script ran and exited zero, or was skipped.
    pub fn success(&self) -> bool {
        matches!(self.status, ScriptStatus::Skipped)
            || (self.status == ScriptStatus::Completed && self.code == 0)
    }

    fn report(&self, script_path: &Path) {
        match self.status {
            ScriptStatus::Skipped => return,
            ScriptStatus::Completed => {
                println!("script {} exited with code {}", script_path.display(), self.code)
            }
            ScriptStatus::TimedOut | ScriptStatus::LaunchFailed => {
                eprintln!(
                    "script {} failed: {}",
                    script_path.display(),
                    self.error.as_deref().unwrap_or("unknown error")
                )
            }
        }
        if !self.stdout.trim().is_empty() {
            println!("--- stdout ---\n{}", self.stdout.trim_end());
        }
        if !self.stderr.trim().is_empty() {
            println!("--- stderr ---\n{}", self.stderr.trim_end());
        }
    }
}

/// Execute one script against the mounted rootfs.
///
/// With no emulator the script runs on the host, told where the rootfs
/// lives through the `ROOTFS` environment variable. With an emulator the
/// full chroot lifecycle wraps the run. An empty script is reported as
/// skipped, not as an error, and never retried.
pub fn execute_script(
    mount_point: &Path,
    script_path: &Path,
    emulator: Option<&str>,
    timeout: Option<Duration>,
) -> Result<ScriptOutcome> {
    let body = fs::read_to_string(script_path)
        .with_context(|| format!("failed to read script {}", script_path.display()))?;
    if body.trim().is_empty() {
        eprintln!(
            "warning: script {} is empty, nothing to execute",
            script_path.display()
        );
        return Ok(ScriptOutcome::skipped());
    }

    let mount_point = mount_point
        .canonicalize()
        .unwrap_or_else(|_| mount_point.to_path_buf());

    let result = match emulator {
        None => {
            println!(
                "executing {} on the host (ROOTFS={})",
                script_path.display(),
                mount_point.display()
            );
            let script_abs = script_path
                .canonicalize()
                .unwrap_or_else(|_| script_path.to_path_buf());
            let mut cmd = Cmd::script(&script_abs).env("ROOTFS", mount_point.to_string_lossy());
            if let Some(timeout) = timeout {
                cmd = cmd.timeout(timeout);
            }
            cmd.run()
        }
        Some(emulator) => {
            println!(
                "executing {} inside chroot {} via {}",
                script_path.display(),
                mount_point.display(),
                emulator
            );
            chroot::run_with_emulation(&mount_point, script_path, &body, emulator, timeout)?
        }
    };

    let outcome = ScriptOutcome::from_exec(result);
    outcome.report(script_path);
    Ok(outcome)
}
