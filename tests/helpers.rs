//! Shared test utilities for overroot tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test environment with a fake mounted rootfs and an overlay source tree.
///
/// The overlay engine only sees directories, so a plain temp dir stands in
/// for a mounted image.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Stand-in for the mounted rootfs
    pub rootfs: PathBuf,
    /// Overlay source tree
    pub overlay: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let rootfs = base.join("rootfs");
        let overlay = base.join("overlay");
        fs::create_dir_all(&rootfs).expect("Failed to create rootfs dir");
        fs::create_dir_all(&overlay).expect("Failed to create overlay dir");

        Self {
            _temp_dir: temp_dir,
            rootfs,
            overlay,
        }
    }

    /// Path inside the temp base but outside rootfs/overlay.
    pub fn scratch(&self, name: &str) -> PathBuf {
        self._temp_dir.path().join(name)
    }
}

/// Write a file, creating parent directories as needed.
pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dirs");
    }
    fs::write(path, content).expect("Failed to write file");
}

/// Write an executable script with a shebang.
pub fn write_executable(path: &Path, content: &str) {
    write_file(path, content);
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod script");
}

/// Permission bits of a file, masked to the mode bits.
pub fn file_mode(path: &Path) -> u32 {
    fs::metadata(path)
        .expect("Failed to stat file")
        .permissions()
        .mode()
        & 0o7777
}

pub fn assert_file_content(path: &Path, expected: &str) {
    let actual = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    assert_eq!(actual, expected, "content mismatch for {}", path.display());
}
