//! Overroot - rootfs image overlay tool.
//!
//! Mounts an ext2/ext4 rootfs image, deletes unwanted paths, applies a
//! local overlay tree onto the mounted root, runs optional pre/post
//! scripts (host-side, or chrooted through a static user-mode emulator
//! for foreign-architecture images), and tears everything down again.
#![allow(dead_code)]

mod chroot;
mod commands;
mod config;
mod error;
mod image;
mod mount;
mod overlay;
mod preflight;
mod process;
mod script;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use commands::OverlayOpts;
use config::Config;

#[derive(Parser)]
#[command(name = "overroot")]
#[command(about = "Apply overlays, removals and scripts to ext2/ext4 rootfs images")]
#[command(
    after_help = "QUICK START:\n  overroot preflight                       Check host tools\n  overroot overlay rootfs.img -o tree/     Apply an overlay tree\n  overroot mount rootfs.img -m /mnt/work   Mount for manual inspection"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount an image, apply removals/overlay/scripts, unmount
    Overlay {
        /// Path to the rootfs image file
        image: PathBuf,

        /// Overlay directory applied onto the mounted root
        #[arg(short, long)]
        overlay: Option<PathBuf>,

        /// Script executed before the overlay is applied
        #[arg(short = 's', long)]
        pre_script: Option<PathBuf>,

        /// Script executed after the overlay is applied
        #[arg(short = 'S', long)]
        post_script: Option<PathBuf>,

        /// Emulator binary for chrooted script execution
        /// (e.g. qemu-aarch64-static); scripts run host-side without it
        #[arg(short = 'q', long)]
        emulator: Option<String>,

        /// Paths removed from the rootfs before the overlay
        #[arg(short, long, num_args = 1..)]
        remove: Vec<String>,

        /// File listing paths to remove, one per line (# comments allowed)
        #[arg(short = 'R', long)]
        remove_list: Option<PathBuf>,

        /// Don't restore source permission bits on copied files
        #[arg(long)]
        no_preserve_perm: bool,

        /// Restore source uid:gid on copied files
        #[arg(long)]
        preserve_owner: bool,

        /// Per-script timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Mount an image (optionally preparing a chroot) and leave it mounted
    Mount {
        /// Path to the rootfs image file
        image: PathBuf,

        /// Existing directory to mount onto
        #[arg(short, long)]
        mount_point: PathBuf,

        /// Emulator binary to stage for chroot work
        #[arg(short = 'q', long)]
        emulator: Option<String>,
    },

    /// Check host tool dependencies
    Preflight {
        /// Exit non-zero if any required tool is missing
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();
    let mut config = Config::load();

    match cli.command {
        Commands::Overlay {
            image,
            overlay,
            pre_script,
            post_script,
            emulator,
            remove,
            remove_list,
            no_preserve_perm,
            preserve_owner,
            timeout,
        } => {
            if no_preserve_perm {
                config.preserve_perm = false;
            }
            if preserve_owner {
                config.preserve_owner = true;
            }
            if let Some(secs) = timeout {
                config.script_timeout = Some(Duration::from_secs(secs));
            }
            let opts = OverlayOpts {
                image,
                overlay,
                pre_script,
                post_script,
                emulator,
                remove,
                remove_list,
            };
            commands::cmd_overlay(&opts, &config)?;
        }

        Commands::Mount {
            image,
            mount_point,
            emulator,
        } => {
            commands::cmd_mount(&image, &mount_point, emulator.as_deref())?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(strict)?;
        }
    }

    Ok(())
}
