//! Preflight checks for the host environment.
//!
//! Validates the external tools the pipeline shells out to before any
//! image is touched. Run with `overroot preflight`.

use anyhow::{bail, Result};

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed - the pipeline cannot run.
    Fail,
    /// Check passed but with a warning.
    Warn,
}

impl CheckResult {
    fn pass_with(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details.to_string()),
        }
    }

    fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.to_string()),
        }
    }

    fn warn(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            details: Some(details.to_string()),
        }
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if no check failed.
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    pub fn fail_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let icon = match check.status {
                CheckStatus::Pass => "✓",
                CheckStatus::Fail => "✗",
                CheckStatus::Warn => "⚠",
            };
            print!("  {} {}", icon, check.name);
            if let Some(details) = &check.details {
                println!(": {}", details);
            } else {
                println!();
            }
        }

        println!();
        let failed = self.fail_count();
        if failed == 0 {
            println!("All required host tools present.");
        } else {
            println!("{} required tool(s) missing.", failed);
        }
    }
}

/// Tools the mount/overlay/chroot pipeline shells out to.
const REQUIRED_TOOLS: [(&str, &str); 5] = [
    ("file", "detects the image filesystem format"),
    ("mount", "loop-mounts the image and binds special filesystems"),
    ("umount", "unmounts the image and special filesystems"),
    ("sh", "runs shell one-liners and chroot wrappers"),
    ("chroot", "enters the mounted rootfs for emulated scripts"),
];

/// Emulators worth having for foreign-architecture images.
const OPTIONAL_EMULATORS: [&str; 2] = ["qemu-aarch64-static", "qemu-arm-static"];

/// Check every host tool the pipeline depends on.
pub fn run_preflight() -> PreflightReport {
    let mut checks = Vec::new();

    for (tool, purpose) in REQUIRED_TOOLS {
        match which::which(tool) {
            Ok(path) => checks.push(CheckResult::pass_with(tool, &path.display().to_string())),
            Err(_) => checks.push(CheckResult::fail(tool, purpose)),
        }
    }

    for emulator in OPTIONAL_EMULATORS {
        match which::which(emulator) {
            Ok(path) => {
                checks.push(CheckResult::pass_with(emulator, &path.display().to_string()))
            }
            Err(_) => checks.push(CheckResult::warn(
                emulator,
                "not installed; only needed for chrooted scripts on that architecture",
            )),
        }
    }

    PreflightReport { checks }
}

/// Run preflight and fail hard if any required tool is missing.
pub fn run_preflight_or_fail() -> Result<()> {
    let report = run_preflight();
    report.print();
    if !report.all_passed() {
        bail!("{} required host tool(s) missing", report.fail_count());
    }
    Ok(())
}
