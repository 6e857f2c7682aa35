//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `overlay` - full mount/remove/script/overlay/unmount pipeline
//! - `mount` - mount an image and leave it mounted for manual work
//! - `preflight` - host tool checks

pub mod mount;
pub mod overlay;
mod preflight;

pub use mount::cmd_mount;
pub use overlay::{cmd_overlay, OverlayOpts};
pub use preflight::cmd_preflight;
