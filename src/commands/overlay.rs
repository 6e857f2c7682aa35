//! Overlay command - the full image mutation pipeline.
//!
//! Strictly sequential: validate, mount, remove, pre-script, overlay,
//! post-script, then guaranteed cleanup whatever happened in between.

use anyhow::Result;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::{Config, EmulatorPolicy};
use crate::error::Error;
use crate::image;
use crate::mount;
use crate::overlay::{self, CopyOptions, RemovalStatus};
use crate::script;

/// Validated-by-clap inputs for the overlay pipeline.
pub struct OverlayOpts {
    pub image: PathBuf,
    pub overlay: Option<PathBuf>,
    pub pre_script: Option<PathBuf>,
    pub post_script: Option<PathBuf>,
    pub emulator: Option<String>,
    pub remove: Vec<String>,
    pub remove_list: Option<PathBuf>,
}

/// Execute the overlay command.
pub fn cmd_overlay(opts: &OverlayOpts, config: &Config) -> Result<()> {
    validate_inputs(opts)?;
    let emulator = resolve_emulator(opts.emulator.as_deref(), config)?;

    // One unique mount point per run, so concurrent invocations against
    // different images never collide.
    let mount_point = env::temp_dir().join(format!("overroot_{}", Uuid::new_v4().simple()));
    fs::create_dir_all(&mount_point)?;
    println!("mount point created at {}", mount_point.display());

    let outcome = run_pipeline(opts, config, emulator.as_deref(), &mount_point);
    // Cleanup runs on every exit path and never overrides the outcome.
    mount::cleanup_mount_point(&mount_point, true);
    outcome
}

fn validate_inputs(opts: &OverlayOpts) -> Result<()> {
    if !opts.image.is_file() {
        return Err(Error::Validation(format!(
            "rootfs image not found: {}",
            opts.image.display()
        ))
        .into());
    }
    println!("validating rootfs image {}...", opts.image.display());
    if !image::validate_rootfs_image(&opts.image)? {
        return Err(Error::Validation(format!(
            "{} is not a valid ext2/ext4 rootfs image",
            opts.image.display()
        ))
        .into());
    }
    println!("{} validated", opts.image.display());

    if let Some(dir) = &opts.overlay {
        if !dir.is_dir() {
            return Err(
                Error::Validation(format!("overlay directory not found: {}", dir.display()))
                    .into(),
            );
        }
    }
    for (label, script) in [
        ("pre-overlay", &opts.pre_script),
        ("post-overlay", &opts.post_script),
    ] {
        if let Some(script) = script {
            if !script.is_file() {
                return Err(Error::Validation(format!(
                    "{} script not found: {}",
                    label,
                    script.display()
                ))
                .into());
            }
        }
    }
    // An explicitly named remove list must exist; only an omitted one is
    // allowed to be absent.
    if let Some(list) = &opts.remove_list {
        if !list.is_file() {
            return Err(
                Error::Validation(format!("remove list not found: {}", list.display())).into(),
            );
        }
    }
    Ok(())
}

/// Apply the missing-emulator policy: fail fast, or warn and fall back to
/// host-side script execution.
fn resolve_emulator(emulator: Option<&str>, config: &Config) -> Result<Option<String>> {
    let Some(name) = emulator.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if which::which(name).is_ok() {
        return Ok(Some(name.to_string()));
    }
    match config.emulator_policy {
        EmulatorPolicy::Fail => Err(Error::EmulatorNotFound(name.to_string()).into()),
        EmulatorPolicy::Warn => {
            eprintln!(
                "warning: emulator '{}' not found in PATH; scripts will run without a chroot",
                name
            );
            Ok(None)
        }
    }
}

fn run_pipeline(
    opts: &OverlayOpts,
    config: &Config,
    emulator: Option<&str>,
    mount_point: &Path,
) -> Result<()> {
    mount::mount_rootfs_image(&opts.image, mount_point)?;
    if !mount::is_mounted(mount_point) {
        return Err(Error::Mount {
            image: opts.image.clone(),
            mount_point: mount_point.to_path_buf(),
            detail: "mount command succeeded but the probe marker is still visible".to_string(),
        }
        .into());
    }
    println!("rootfs image mounted, $ROOTFS = {}", mount_point.display());

    // Explicit --remove entries first, then the remove-list file.
    let mut removals = opts.remove.clone();
    if let Some(list) = &opts.remove_list {
        removals.extend(overlay::parse_remove_list(list)?);
    }
    if !removals.is_empty() {
        println!("applying {} removal(s)...", removals.len());
        let results = overlay::apply_removals(mount_point, &removals);
        let failed = results
            .iter()
            .filter(|r| matches!(r.status, RemovalStatus::Failed(_)))
            .count();
        if failed > 0 {
            eprintln!("warning: {} removal(s) failed, continuing", failed);
        }
    }

    if let Some(pre_script) = &opts.pre_script {
        println!("executing pre-overlay script...");
        let outcome =
            script::execute_script(mount_point, pre_script, emulator, config.script_timeout)?;
        if !outcome.success() {
            eprintln!("warning: pre-overlay script did not succeed, continuing");
        }
    }

    if let Some(overlay_dir) = &opts.overlay {
        println!("applying overlay from {}...", overlay_dir.display());
        let options = CopyOptions {
            preserve_perm: config.preserve_perm,
            preserve_owner: config.preserve_owner,
        };
        let summary = overlay::apply_overlay(mount_point, overlay_dir, options)?;
        println!(
            "overlay applied: {} file(s) copied, {} failed",
            summary.copied(),
            summary.failed()
        );
    }

    if let Some(post_script) = &opts.post_script {
        println!("executing post-overlay script...");
        let outcome =
            script::execute_script(mount_point, post_script, emulator, config.script_timeout)?;
        if !outcome.success() {
            eprintln!("warning: post-overlay script did not succeed, continuing");
        }
    }

    Ok(())
}
