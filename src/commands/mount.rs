//! Mount command - mount an image and leave it mounted for manual work.
//!
//! Unlike the overlay pipeline there is no automatic teardown here; the
//! printed instructions tell the user how to unwind by hand.

use anyhow::Result;
use std::path::Path;

use crate::chroot;
use crate::error::Error;
use crate::image;
use crate::mount;

/// Execute the mount command.
pub fn cmd_mount(image: &Path, mount_point: &Path, emulator: Option<&str>) -> Result<()> {
    if !image.is_file() {
        return Err(
            Error::Validation(format!("rootfs image not found: {}", image.display())).into(),
        );
    }
    println!("validating rootfs image {}...", image.display());
    if !image::validate_rootfs_image(image)? {
        return Err(Error::Validation(format!(
            "{} is not a valid ext2/ext4 rootfs image",
            image.display()
        ))
        .into());
    }
    if !mount_point.is_dir() {
        return Err(Error::Validation(format!(
            "mount point not found: {}",
            mount_point.display()
        ))
        .into());
    }
    // The standalone mode fails fast on a missing emulator: there is no
    // pipeline to fall back to, the chroot is the whole point of -q.
    if let Some(name) = emulator {
        if which::which(name).is_err() {
            return Err(Error::EmulatorNotFound(name.to_string()).into());
        }
    }

    mount::mount_rootfs_image(image, mount_point)?;
    if !mount::is_mounted(mount_point) {
        return Err(Error::Mount {
            image: image.to_path_buf(),
            mount_point: mount_point.to_path_buf(),
            detail: "mount command succeeded but the probe marker is still visible".to_string(),
        }
        .into());
    }
    println!("rootfs image mounted at {}", mount_point.display());

    let Some(emulator) = emulator else {
        println!("unmount it when you are done:");
        println!("  umount -l {}", mount_point.display());
        return Ok(());
    };

    println!("preparing chroot environment...");
    chroot::stage_emulator(mount_point, emulator)?;
    chroot::bind_special_filesystems(mount_point)?;
    println!("chroot environment ready, for example:");
    println!("  chroot {} /bin/sh", mount_point.display());
    println!("tear it down when you are done:");
    println!("  rm -f {}/usr/bin/{}", mount_point.display(), emulator);
    for target in ["run", "dev/pts", "dev", "sys", "proc"] {
        println!("  umount -l {}/{}", mount_point.display(), target);
    }
    println!("  umount -l {}", mount_point.display());

    Ok(())
}
