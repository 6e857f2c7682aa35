//! Overlay application and path removal inside a mounted rootfs.
//!
//! Both operations are best-effort per item: one file that cannot be
//! copied or removed is recorded and reported, and the remaining items
//! still run. Nothing here mounts or unmounts; callers hand in a mount
//! point the mount manager asserts is live.

use anyhow::{bail, Context, Result};
use filetime::FileTime;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Which source metadata to restore onto overlaid files.
#[derive(Debug, Clone, Copy)]
pub struct CopyOptions {
    /// Re-apply the source permission bits to the destination.
    pub preserve_perm: bool,
    /// Re-apply the source uid:gid to the destination.
    pub preserve_owner: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            preserve_perm: true,
            preserve_owner: false,
        }
    }
}

/// Outcome of one removal entry.
#[derive(Debug)]
pub struct Removal {
    /// The entry as the caller wrote it.
    pub entry: String,
    pub status: RemovalStatus,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RemovalStatus {
    RemovedDir,
    RemovedFile,
    /// Path not present under the mount point; a no-op, not an error.
    Missing,
    /// Entry would resolve outside the mount point; never touched.
    Rejected,
    Failed(String),
}

/// Outcome of one overlay file copy.
#[derive(Debug)]
pub struct CopyOutcome {
    /// Destination path relative to the mount point.
    pub relative: PathBuf,
    pub status: CopyStatus,
}

#[derive(Debug)]
pub enum CopyStatus {
    Copied,
    Failed(String),
}

/// Aggregated result of an overlay application.
#[derive(Debug, Default)]
pub struct OverlaySummary {
    pub outcomes: Vec<CopyOutcome>,
}

impl OverlaySummary {
    pub fn copied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, CopyStatus::Copied))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.copied()
    }
}

/// Parse a remove-list file: one path fragment per line, blank lines and
/// `#` comment lines skipped, file order preserved. A missing file is an
/// empty list, not an error.
pub fn parse_remove_list(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read remove list {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Resolve a removal entry to a path relative to the rootfs.
///
/// Leading slashes are stripped; `.` components collapse; anything that
/// would climb out of the rootfs (`..`) is refused.
fn rootfs_relative(entry: &str) -> Option<PathBuf> {
    let trimmed = entry.trim().trim_start_matches('/');
    let mut relative = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// Delete the listed paths from the mounted rootfs.
///
/// Missing paths are no-ops; a failed deletion is recorded and processing
/// continues with the next entry.
pub fn apply_removals(mount_point: &Path, entries: &[String]) -> Vec<Removal> {
    let mut results = Vec::new();

    for raw in entries {
        let entry = raw.trim();
        if entry.is_empty() {
            continue;
        }
        let status = remove_one(mount_point, entry);
        let display = format!("$ROOTFS/{}", entry.trim_start_matches('/'));
        match &status {
            RemovalStatus::RemovedDir => println!("removed directory {}", display),
            RemovalStatus::RemovedFile => println!("removed file {}", display),
            RemovalStatus::Missing => println!("{} not found, skipped", display),
            RemovalStatus::Rejected => {
                eprintln!("warning: refusing to remove {}: escapes the rootfs", display)
            }
            RemovalStatus::Failed(err) => {
                eprintln!("warning: failed to remove {}: {}", display, err)
            }
        }
        results.push(Removal {
            entry: entry.to_string(),
            status,
        });
    }

    results
}

fn remove_one(mount_point: &Path, entry: &str) -> RemovalStatus {
    let Some(relative) = rootfs_relative(entry) else {
        return RemovalStatus::Rejected;
    };
    let target = mount_point.join(relative);

    // symlink_metadata so a link to a directory is unlinked, not recursed.
    let metadata = match fs::symlink_metadata(&target) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return RemovalStatus::Missing,
        Err(err) => return RemovalStatus::Failed(err.to_string()),
    };

    if metadata.is_dir() {
        match fs::remove_dir_all(&target) {
            Ok(()) => RemovalStatus::RemovedDir,
            Err(err) => RemovalStatus::Failed(err.to_string()),
        }
    } else {
        match fs::remove_file(&target) {
            Ok(()) => RemovalStatus::RemovedFile,
            Err(err) => RemovalStatus::Failed(err.to_string()),
        }
    }
}

/// Replicate every regular file under `overlay_dir` into the mounted
/// rootfs at its mirrored relative path.
///
/// Directories are traversal-only: parents are created on demand for the
/// files that need them, and empty directories are never materialized.
/// Per-file failures are recorded in the summary and do not abort the
/// remaining files.
pub fn apply_overlay(
    mount_point: &Path,
    overlay_dir: &Path,
    options: CopyOptions,
) -> Result<OverlaySummary> {
    if !overlay_dir.is_dir() {
        bail!("overlay directory not found: {}", overlay_dir.display());
    }

    let mut summary = OverlaySummary::default();
    // Sorted walk keeps the copy log deterministic.
    for entry in WalkDir::new(overlay_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                eprintln!("warning: overlay walk error: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(overlay_dir)
            .unwrap_or(entry.path())
            .to_path_buf();

        let status = match copy_one(mount_point, entry.path(), &relative, options) {
            Ok(()) => {
                println!(
                    "copied {} -> $ROOTFS/{}",
                    entry.path().display(),
                    relative.display()
                );
                CopyStatus::Copied
            }
            Err(err) => {
                eprintln!("warning: failed to copy {}: {:#}", entry.path().display(), err);
                CopyStatus::Failed(format!("{:#}", err))
            }
        };
        summary.outcomes.push(CopyOutcome { relative, status });
    }

    Ok(summary)
}

fn copy_one(mount_point: &Path, source: &Path, relative: &Path, options: CopyOptions) -> Result<()> {
    let dest = mount_point.join(relative);

    if let Some(parent) = dest.parent() {
        if !parent.is_dir() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    fs::copy(source, &dest).with_context(|| format!("copy to {}", dest.display()))?;

    let metadata = fs::metadata(source)
        .with_context(|| format!("failed to stat {}", source.display()))?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_mtime(&dest, mtime)
        .with_context(|| format!("failed to set mtime on {}", dest.display()))?;

    if options.preserve_perm {
        fs::set_permissions(&dest, metadata.permissions())
            .with_context(|| format!("failed to restore permissions on {}", dest.display()))?;
    }
    if options.preserve_owner {
        std::os::unix::fs::chown(&dest, Some(metadata.uid()), Some(metadata.gid()))
            .with_context(|| format!("failed to restore owner on {}", dest.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rootfs_relative_strips_leading_slashes() {
        assert_eq!(
            rootfs_relative("/var/log"),
            Some(PathBuf::from("var/log"))
        );
        assert_eq!(
            rootfs_relative("///usr/share/doc"),
            Some(PathBuf::from("usr/share/doc"))
        );
    }

    #[test]
    fn test_rootfs_relative_collapses_curdir() {
        assert_eq!(
            rootfs_relative("./etc/./hostname"),
            Some(PathBuf::from("etc/hostname"))
        );
    }

    #[test]
    fn test_rootfs_relative_refuses_escapes() {
        assert_eq!(rootfs_relative("../etc/passwd"), None);
        assert_eq!(rootfs_relative("var/../../etc"), None);
        assert_eq!(rootfs_relative(""), None);
        assert_eq!(rootfs_relative("/"), None);
    }

    #[test]
    fn test_parse_remove_list_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("remove.txt");
        fs::write(
            &list,
            "var/log\n#comment\n\n  # indented comment\n  usr/share/doc  \n",
        )
        .unwrap();

        let entries = parse_remove_list(&list).unwrap();
        assert_eq!(entries, vec!["var/log", "usr/share/doc"]);
    }

    #[test]
    fn test_parse_remove_list_missing_file_is_empty() {
        let entries = parse_remove_list(Path::new("/nonexistent_remove_list")).unwrap();
        assert!(entries.is_empty());
    }
}
