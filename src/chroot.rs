//! Chroot preparation and emulated script execution inside a mounted rootfs.
//!
//! Foreign-architecture scripts run through a statically linked user-mode
//! emulator (qemu-*-static) staged into the rootfs at `usr/bin/`; once it
//! is present there, the kernel's binfmt handling resolves guest binaries
//! through it transparently. Before chrooting, the special filesystems a
//! booted system would have (proc, sys, dev, dev/pts, run) are bound into
//! the rootfs, and they are always unwound afterwards, whatever happened
//! in between.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
use crate::process::{Cmd, CommandResult, ExecError};

/// Heredoc terminator for the chroot wrapper script.
const WRAPPER_EOF: &str = "__OVERROOT_CHROOT__";

enum MountKind {
    /// Fresh mount of a kernel filesystem type.
    Fs(&'static str),
    /// Bind mount of a host tree.
    Bind,
}

struct SpecialMount {
    /// Path relative to the mount point.
    target: &'static str,
    source: &'static str,
    kind: MountKind,
}

/// Special filesystems bound into the rootfs before chrooting, in mount
/// order. Teardown walks this list in reverse.
const SPECIAL_FILESYSTEMS: [SpecialMount; 5] = [
    SpecialMount {
        target: "proc",
        source: "/proc",
        kind: MountKind::Fs("proc"),
    },
    SpecialMount {
        target: "sys",
        source: "/sys",
        kind: MountKind::Fs("sysfs"),
    },
    SpecialMount {
        target: "dev",
        source: "/dev",
        kind: MountKind::Bind,
    },
    SpecialMount {
        target: "dev/pts",
        source: "/dev/pts",
        kind: MountKind::Bind,
    },
    SpecialMount {
        target: "run",
        source: "/run",
        kind: MountKind::Bind,
    },
];

/// Copy the named emulator from the host PATH into the rootfs `usr/bin/`
/// and mark it executable.
pub fn stage_emulator(mount_point: &Path, emulator: &str) -> Result<PathBuf> {
    let host_path =
        which::which(emulator).map_err(|_| Error::EmulatorNotFound(emulator.to_string()))?;

    let bin_dir = mount_point.join("usr/bin");
    fs::create_dir_all(&bin_dir)
        .with_context(|| format!("failed to create {}", bin_dir.display()))?;
    let staged = bin_dir.join(emulator);

    println!("staging {} -> {}", host_path.display(), staged.display());
    fs::copy(&host_path, &staged)
        .with_context(|| format!("failed to stage emulator at {}", staged.display()))?;
    fs::set_permissions(&staged, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to mark {} executable", staged.display()))?;

    Ok(staged)
}

/// Delete the staged emulator copy. A missing file is a no-op.
pub fn remove_emulator(mount_point: &Path, emulator: &str) -> Result<()> {
    let staged = mount_point.join("usr/bin").join(emulator);
    if staged.is_file() {
        println!("removing staged emulator {}", staged.display());
        fs::remove_file(&staged)
            .with_context(|| format!("failed to remove {}", staged.display()))?;
    }
    Ok(())
}

/// Mount the special filesystems into the rootfs, in fixed order.
///
/// Each one is a prerequisite for scripts to see a usable root, so the
/// first failure aborts. Partial binds are the caller's to unwind (see
/// [`run_with_emulation`]).
pub fn bind_special_filesystems(mount_point: &Path) -> Result<()> {
    for special in &SPECIAL_FILESYSTEMS {
        let target = mount_point.join(special.target);
        println!("binding {} -> {}", special.source, target.display());
        let cmd = match special.kind {
            MountKind::Fs(fstype) => Cmd::new("mount").args(["-t", fstype]).arg(special.source),
            MountKind::Bind => Cmd::new("mount").args(["-o", "bind"]).arg(special.source),
        };
        cmd.arg_path(&target)
            .error_msg(format!("failed to bind {}", target.display()))
            .run_checked()?;
    }
    Ok(())
}

/// Lazy-unmount all special filesystems in reverse bind order.
///
/// Every target is attempted; a busy or never-bound target is reported
/// and does not stop the rest. Returns the targets that failed.
pub fn unbind_special_filesystems(mount_point: &Path) -> Vec<String> {
    let mut failures = Vec::new();
    for special in SPECIAL_FILESYSTEMS.iter().rev() {
        let target = mount_point.join(special.target);
        match Cmd::new("umount").arg("-l").arg_path(&target).run() {
            Ok(result) if result.success() => {
                println!("unbound {}", target.display());
            }
            Ok(result) => {
                eprintln!(
                    "warning: failed to unbind {}: {}",
                    target.display(),
                    result.stderr_trimmed()
                );
                failures.push(special.target.to_string());
            }
            Err(err) => {
                eprintln!("warning: failed to unbind {}: {}", target.display(), err);
                failures.push(special.target.to_string());
            }
        }
    }
    failures
}

/// Build the wrapper that enters the chroot and feeds it the caller's
/// script verbatim over a quoted heredoc.
///
/// The wrapper runs as a file of its own, so the shell inside the chroot
/// sees the original script body unreinterpreted, bracketed by delimiter
/// comments naming where it came from.
pub fn wrapper_script(mount_point: &Path, script_path: &Path, script_body: &str) -> String {
    let mut wrapper = String::new();
    wrapper.push_str("#!/bin/sh\n");
    wrapper.push_str(&format!(
        "chroot {} /bin/sh <<'{}'\n",
        mount_point.display(),
        WRAPPER_EOF
    ));
    wrapper.push_str("cd /\n");
    wrapper.push_str("echo \"chroot active at $(pwd)\"\n");
    wrapper.push_str(&format!("# ---- begin {} ----\n", script_path.display()));
    wrapper.push_str(script_body);
    if !script_body.ends_with('\n') {
        wrapper.push('\n');
    }
    wrapper.push_str(&format!("# ---- end {} ----\n", script_path.display()));
    wrapper.push_str(WRAPPER_EOF);
    wrapper.push('\n');
    wrapper
}

/// Execute `script_body` inside the chrooted rootfs.
///
/// The wrapper is a temporary executable file, run directly and deleted
/// afterwards regardless of the outcome. A wrapper that cannot be written
/// is reported as a launch failure.
pub fn run_in_chroot(
    mount_point: &Path,
    script_path: &Path,
    script_body: &str,
    timeout: Option<Duration>,
) -> std::result::Result<CommandResult, ExecError> {
    let wrapper = wrapper_script(mount_point, script_path, script_body);

    let wrapper_error = |source| ExecError::Spawn {
        program: "chroot wrapper".to_string(),
        source,
    };
    let mut file = tempfile::Builder::new()
        .prefix("overroot_chroot_")
        .suffix(".sh")
        .tempfile()
        .map_err(wrapper_error)?;
    file.write_all(wrapper.as_bytes()).map_err(wrapper_error)?;
    file.flush().map_err(wrapper_error)?;
    fs::set_permissions(file.path(), fs::Permissions::from_mode(0o755))
        .map_err(wrapper_error)?;

    let mut cmd = Cmd::script(file.path());
    if let Some(timeout) = timeout {
        cmd = cmd.timeout(timeout);
    }
    // `file` drops here afterwards, deleting the wrapper whatever happened.
    cmd.run()
}

/// Run one script chrooted, with the full emulation lifecycle around it:
/// stage emulator, bind special filesystems, execute, then always unbind
/// and unstage.
///
/// The unwind steps run even when staging, binding or execution failed
/// partway, each in its own error boundary, and a failure in one never
/// stops the next.
pub fn run_with_emulation(
    mount_point: &Path,
    script_path: &Path,
    script_body: &str,
    emulator: &str,
    timeout: Option<Duration>,
) -> Result<std::result::Result<CommandResult, ExecError>> {
    let exec_result = (|| -> Result<std::result::Result<CommandResult, ExecError>> {
        stage_emulator(mount_point, emulator)?;
        bind_special_filesystems(mount_point)?;
        Ok(run_in_chroot(mount_point, script_path, script_body, timeout))
    })();

    let failures = unbind_special_filesystems(mount_point);
    if !failures.is_empty() {
        eprintln!(
            "warning: {} special filesystem(s) did not unbind cleanly: {}",
            failures.len(),
            failures.join(", ")
        );
    }
    if let Err(err) = remove_emulator(mount_point, emulator) {
        eprintln!("warning: failed to unstage emulator: {:#}", err);
    }

    exec_result
}
