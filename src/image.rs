//! Rootfs image format detection.

use anyhow::{Context, Result};
use std::path::Path;

use crate::process::Cmd;

/// Substrings `file(1)` prints for supported filesystem images.
const EXT4_SIGNATURE: &str = "ext4 filesystem";
const EXT2_SIGNATURE: &str = "ext2 filesystem";

/// Detect whether `path` is a loop-mountable ext2/ext4 image.
///
/// Sniffs content via `file -b` rather than trusting the extension.
/// Unreadable or unrecognized files report `false`; only a failure to run
/// `file` itself is an error.
pub fn validate_rootfs_image(path: &Path) -> Result<bool> {
    let abs = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let result = Cmd::new("file")
        .arg("-b")
        .arg_path(&abs)
        .run()
        .context("failed to run 'file' for image detection")?;

    if !result.success() {
        return Ok(false);
    }
    let description = result.stdout;
    Ok(description.contains(EXT4_SIGNATURE) || description.contains(EXT2_SIGNATURE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::exists;
    use std::fs;

    #[test]
    fn test_text_file_is_not_an_image() {
        if !exists("file") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.img");
        fs::write(&path, "just some text\n").unwrap();

        assert!(!validate_rootfs_image(&path).unwrap());
    }

    #[test]
    fn test_missing_file_fails_closed() {
        if !exists("file") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.img");

        assert!(!validate_rootfs_image(&path).unwrap());
    }
}
