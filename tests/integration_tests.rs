//! Integration tests for the overlay pipeline pieces working together.
//!
//! Everything up to the `root_` tests runs against plain directories.
//! The `root_` tests build and loop-mount a real ext4 image; they need
//! root and mkfs.ext4, so they are ignored by default:
//!
//!   sudo -E cargo test --test integration_tests -- --ignored

mod helpers;

use helpers::{assert_file_content, file_mode, write_executable, write_file, TestEnv};
use overroot::mount;
use overroot::overlay::{apply_overlay, apply_removals, parse_remove_list, CopyOptions};
use overroot::process::{exists, Cmd};
use overroot::script::{execute_script, ScriptStatus};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

// =============================================================================
// remove + overlay ordering
// =============================================================================

#[test]
fn test_remove_then_overlay_leaves_overlay_version() {
    let env = TestEnv::new();
    write_file(&env.rootfs.join("etc/hostname"), "stale");
    write_file(&env.rootfs.join("etc/old-config"), "stale");
    write_file(&env.overlay.join("etc/hostname"), "node1");

    // The pipeline removes before overlaying; with "etc" in the remove
    // list the overlay's version must be the survivor.
    apply_removals(&env.rootfs, &["etc".to_string()]);
    apply_overlay(&env.rootfs, &env.overlay, CopyOptions::default()).unwrap();

    assert_file_content(&env.rootfs.join("etc/hostname"), "node1");
    assert!(!env.rootfs.join("etc/old-config").exists());
}

#[test]
fn test_remove_list_scenario_two_entries_one_missing() {
    let env = TestEnv::new();
    let list = env.scratch("remove.txt");
    write_file(&list, "var/log\n#comment\n\nusr/share/doc\n");
    // Only usr/share/doc exists; var/log missing must not fail anything.
    write_file(&env.rootfs.join("usr/share/doc/README"), "docs");

    let entries = parse_remove_list(&list).unwrap();
    assert_eq!(entries.len(), 2);

    let results = apply_removals(&env.rootfs, &entries);
    assert_eq!(results.len(), 2);
    assert!(!env.rootfs.join("usr/share/doc").exists());
}

// =============================================================================
// script execution (host-side)
// =============================================================================

#[test]
fn test_script_sees_rootfs_env_var() {
    let env = TestEnv::new();
    let script = env.scratch("probe.sh");
    write_executable(&script, "#!/bin/sh\necho \"rootfs is $ROOTFS\"\n");

    let outcome = execute_script(&env.rootfs, &script, None, None).unwrap();

    assert_eq!(outcome.status, ScriptStatus::Completed);
    assert_eq!(outcome.code, 0);
    let canonical = env.rootfs.canonicalize().unwrap();
    assert!(outcome.stdout.contains(&canonical.display().to_string()));
}

#[test]
fn test_script_writes_into_rootfs() {
    let env = TestEnv::new();
    let script = env.scratch("touch.sh");
    write_executable(
        &script,
        "#!/bin/sh\nmkdir -p \"$ROOTFS/etc\"\necho configured > \"$ROOTFS/etc/state\"\n",
    );

    let outcome = execute_script(&env.rootfs, &script, None, None).unwrap();
    assert!(outcome.success());
    assert_file_content(&env.rootfs.join("etc/state"), "configured\n");
}

#[test]
fn test_empty_script_is_skipped_not_error() {
    let env = TestEnv::new();
    let script = env.scratch("empty.sh");
    write_executable(&script, "   \n\n");

    let outcome = execute_script(&env.rootfs, &script, None, None).unwrap();
    assert_eq!(outcome.status, ScriptStatus::Skipped);
    assert!(outcome.success());
}

#[test]
fn test_failing_script_is_reported_not_raised() {
    let env = TestEnv::new();
    let script = env.scratch("fail.sh");
    write_executable(&script, "#!/bin/sh\necho oops >&2\nexit 3\n");

    let outcome = execute_script(&env.rootfs, &script, None, None).unwrap();
    assert_eq!(outcome.status, ScriptStatus::Completed);
    assert_eq!(outcome.code, 3);
    assert!(outcome.stderr.contains("oops"));
    assert!(!outcome.success());
    assert!(outcome.error.is_none());
}

#[test]
fn test_script_timeout_is_distinct_outcome() {
    let env = TestEnv::new();
    let script = env.scratch("slow.sh");
    write_executable(&script, "#!/bin/sh\nsleep 5\n");

    let outcome =
        execute_script(&env.rootfs, &script, None, Some(Duration::from_millis(200))).unwrap();
    assert_eq!(outcome.status, ScriptStatus::TimedOut);
    assert_eq!(outcome.code, -1);
    assert!(outcome.error.is_some());
}

#[test]
fn test_non_executable_script_is_launch_failure() {
    let env = TestEnv::new();
    let script = env.scratch("noexec.sh");
    write_file(&script, "#!/bin/sh\necho hi\n");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

    let outcome = execute_script(&env.rootfs, &script, None, None).unwrap();
    assert_eq!(outcome.status, ScriptStatus::LaunchFailed);
    assert_eq!(outcome.code, -1);
}

#[test]
fn test_missing_script_is_an_error() {
    let env = TestEnv::new();
    assert!(execute_script(&env.rootfs, &env.scratch("gone.sh"), None, None).is_err());
}

// =============================================================================
// full pipeline against a real image (root only)
// =============================================================================

/// Create a small ext4 image. Returns false when the host can't (no
/// mkfs.ext4), letting callers bail out instead of failing.
fn make_ext4_image(path: &std::path::Path, size_mb: u32) -> bool {
    if !exists("mkfs.ext4") || !exists("file") {
        return false;
    }
    let file = fs::File::create(path).unwrap();
    file.set_len(u64::from(size_mb) * 1024 * 1024).unwrap();
    drop(file);

    Cmd::new("mkfs.ext4")
        .args(["-q", "-F"])
        .arg_path(path)
        .run()
        .map(|r| r.success())
        .unwrap_or(false)
}

fn running_as_root() -> bool {
    Cmd::new("id")
        .arg("-u")
        .run()
        .map(|r| r.stdout_trimmed() == "0")
        .unwrap_or(false)
}

#[test]
#[ignore]
fn root_test_image_validation_accepts_ext4() {
    let env = TestEnv::new();
    let image = env.scratch("test.img");
    if !make_ext4_image(&image, 8) {
        panic!("host cannot create ext4 images (mkfs.ext4/file missing)");
    }
    assert!(overroot::image::validate_rootfs_image(&image).unwrap());
}

#[test]
#[ignore]
fn root_test_full_overlay_round_trip() {
    if !running_as_root() {
        panic!("this test must run as root (loop mounts)");
    }
    let env = TestEnv::new();
    let image = env.scratch("test.img");
    assert!(make_ext4_image(&image, 8), "failed to create scratch image");

    write_file(&env.overlay.join("etc/hostname"), "node1");
    let src = env.overlay.join("etc/hostname");
    fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();

    // First cycle: mount, overlay, unmount.
    let mount_point = env.scratch("mnt");
    fs::create_dir_all(&mount_point).unwrap();
    mount::mount_rootfs_image(&image, &mount_point).unwrap();
    assert!(mount::is_mounted(&mount_point));

    let summary = apply_overlay(&mount_point, &env.overlay, CopyOptions::default()).unwrap();
    assert_eq!(summary.copied(), 1);

    mount::unmount_rootfs_image(&mount_point).unwrap();
    mount::cleanup_mount_point(&mount_point, true);
    assert!(!mount_point.exists());

    // Second cycle: remount and verify the overlay persisted in the image.
    let verify_point = env.scratch("verify");
    fs::create_dir_all(&verify_point).unwrap();
    mount::mount_rootfs_image(&image, &verify_point).unwrap();

    assert_file_content(&verify_point.join("etc/hostname"), "node1");
    assert_eq!(file_mode(&verify_point.join("etc/hostname")), 0o640);

    mount::cleanup_mount_point(&verify_point, true);
}

#[test]
#[ignore]
fn root_test_special_filesystems_bind_and_unbind() {
    if !running_as_root() {
        panic!("this test must run as root (bind mounts)");
    }
    let env = TestEnv::new();
    let image = env.scratch("test.img");
    assert!(make_ext4_image(&image, 8), "failed to create scratch image");

    let mount_point = env.scratch("mnt");
    fs::create_dir_all(&mount_point).unwrap();
    mount::mount_rootfs_image(&image, &mount_point).unwrap();

    // The scratch image is empty; give it the directories a rootfs has.
    for dir in ["proc", "sys", "dev", "run"] {
        fs::create_dir_all(mount_point.join(dir)).unwrap();
    }

    overroot::chroot::bind_special_filesystems(&mount_point).unwrap();
    let canonical = mount_point.canonicalize().unwrap();
    let mounts = fs::read_to_string("/proc/mounts").unwrap();
    assert!(mounts.contains(&format!("{}/proc", canonical.display())));

    let failures = overroot::chroot::unbind_special_filesystems(&mount_point);
    assert!(failures.is_empty(), "unbind failures: {:?}", failures);
    let mounts = fs::read_to_string("/proc/mounts").unwrap();
    assert!(!mounts.contains(&format!("{}/proc", canonical.display())));

    mount::cleanup_mount_point(&mount_point, true);
}
