//! Error taxonomy for the overlay pipeline.
//!
//! Only failures that abort a step are typed here. Per-item copy/removal
//! failures are collected as outcomes (see `overlay`), and script results
//! are reported through `script::ScriptOutcome`, never raised.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad input caught before anything is mounted.
    #[error("{0}")]
    Validation(String),

    /// Loop-mount of the image failed.
    #[error("failed to mount {image} on {mount_point}: {detail}")]
    Mount {
        image: PathBuf,
        mount_point: PathBuf,
        detail: String,
    },

    /// Unmount command failed.
    #[error("failed to unmount {mount_point}: {detail}")]
    Unmount { mount_point: PathBuf, detail: String },

    /// The requested user-mode emulator is not on the host PATH.
    #[error("emulator '{0}' not found in PATH")]
    EmulatorNotFound(String),
}
