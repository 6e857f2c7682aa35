//! Mount lifecycle for rootfs images.
//!
//! Mount state is tracked with a probe marker file instead of parsing
//! kernel mount tables: the marker is written into the mount-point
//! directory before the OS mount call and deleted only after unmount, so
//! it is hidden exactly while a kernel mount sits on top of the directory.
//! The filename carries a per-run random token, which keeps stale markers
//! from unrelated runs from ever aliasing this one.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::error::Error;
use crate::process::Cmd;

static PROBE_FILENAME: OnceLock<String> = OnceLock::new();

/// Probe marker filename, unique per process run.
pub fn probe_filename() -> &'static str {
    PROBE_FILENAME.get_or_init(|| format!(".__overroot_probe_{}__", Uuid::new_v4().simple()))
}

fn probe_path(mount_point: &Path) -> PathBuf {
    mount_point.join(probe_filename())
}

/// Whether this run's probe marker is visible in the directory.
pub fn probe_exists(mount_point: &Path) -> bool {
    probe_path(mount_point).exists()
}

fn create_probe(mount_point: &Path) -> Result<()> {
    let probe = probe_path(mount_point);
    if probe.exists() {
        return Ok(());
    }
    fs::write(&probe, "")
        .with_context(|| format!("failed to create mount probe {}", probe.display()))
}

/// Remove the probe marker if present. Failures only warn; a leftover
/// marker is harmless once the directory is gone.
fn remove_probe(mount_point: &Path) {
    let probe = probe_path(mount_point);
    if probe.is_file() {
        if let Err(err) = fs::remove_file(&probe) {
            eprintln!(
                "warning: failed to remove mount probe {}: {}",
                probe.display(),
                err
            );
        }
    }
}

/// True iff the directory exists and the probe marker is hidden by an
/// active mount.
///
/// A directory can exist with the probe still visible (created, mount not
/// yet issued, or mount failed); that state classifies as not mounted.
pub fn is_mounted(mount_point: &Path) -> bool {
    mount_point.is_dir() && !probe_path(mount_point).exists()
}

/// Loop-mount `image` onto `mount_point`, creating the directory if needed.
///
/// The probe marker is written before the mount command, so a crash or a
/// failed mount leaves the directory correctly classified as not-really-
/// mounted. On mount failure the marker deliberately stays behind.
pub fn mount_rootfs_image(image: &Path, mount_point: &Path) -> Result<()> {
    if !mount_point.is_dir() {
        fs::create_dir_all(mount_point)
            .with_context(|| format!("failed to create mount point {}", mount_point.display()))?;
    }
    create_probe(mount_point)?;

    println!(
        "mounting {} on {}",
        image.display(),
        mount_point.display()
    );
    let result = Cmd::new("mount")
        .args(["-o", "loop"])
        .arg_path(image)
        .arg_path(mount_point)
        .run()?;
    if !result.success() {
        return Err(Error::Mount {
            image: image.to_path_buf(),
            mount_point: mount_point.to_path_buf(),
            detail: result.stderr_trimmed().to_string(),
        }
        .into());
    }

    // Let the overlay and script steps work on the tree unprivileged.
    if let Err(err) = fs::set_permissions(mount_point, fs::Permissions::from_mode(0o777)) {
        eprintln!(
            "warning: failed to relax permissions on {}: {}",
            mount_point.display(),
            err
        );
    }
    Ok(())
}

/// Lazy-unmount the image from `mount_point`.
///
/// The probe marker (visible again once the mount is gone) is deleted as
/// soon as the unmount command has been issued, whatever it reported, so
/// the directory can never get stuck classified as mounted.
pub fn unmount_rootfs_image(mount_point: &Path) -> Result<()> {
    if !mount_point.is_dir() {
        eprintln!(
            "warning: mount point does not exist: {}",
            mount_point.display()
        );
        return Ok(());
    }

    let result = Cmd::new("umount").arg("-l").arg_path(mount_point).run();
    remove_probe(mount_point);

    let result = result?;
    if !result.success() {
        return Err(Error::Unmount {
            mount_point: mount_point.to_path_buf(),
            detail: result.stderr_trimmed().to_string(),
        }
        .into());
    }
    Ok(())
}

/// Best-effort teardown: unmount if still mounted, then optionally remove
/// the (now empty) mount-point directory.
///
/// Never propagates errors and is safe to call repeatedly and from any
/// exit path.
pub fn cleanup_mount_point(mount_point: &Path, remove_dir: bool) {
    if !mount_point.is_dir() {
        return;
    }
    println!("cleaning up {}", mount_point.display());

    if is_mounted(mount_point) {
        if let Err(err) = unmount_rootfs_image(mount_point) {
            eprintln!("warning: cleanup unmount failed: {:#}", err);
        }
    }

    if remove_dir {
        // A probe left behind by a failed mount would keep rmdir from
        // succeeding; it is ours, so clear it first.
        remove_probe(mount_point);
        match fs::remove_dir(mount_point) {
            Ok(()) => println!("removed mount point {}", mount_point.display()),
            Err(err) => eprintln!(
                "warning: failed to remove mount point {}: {}",
                mount_point.display(),
                err
            ),
        }
    }
}
