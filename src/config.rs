//! Configuration management for overroot.
//!
//! Reads configuration from a .env file and environment variables
//! (`dotenvy::dotenv()` is called once in main, so by the time `load`
//! runs, .env entries are visible as plain environment variables;
//! real environment variables take precedence).

use std::env;
use std::time::Duration;

/// What to do when the requested emulator binary is not on the host PATH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorPolicy {
    /// Abort before mounting anything.
    Fail,
    /// Warn and run scripts host-side, without a chroot.
    Warn,
}

/// Overroot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Restore source permission bits on overlaid files.
    pub preserve_perm: bool,
    /// Restore source uid:gid on overlaid files.
    pub preserve_owner: bool,
    /// Missing-emulator policy.
    pub emulator_policy: EmulatorPolicy,
    /// Wall-clock limit per script execution.
    pub script_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preserve_perm: true,
            preserve_owner: false,
            emulator_policy: EmulatorPolicy::Fail,
            script_timeout: None,
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(value) = env_bool("OVERROOT_PRESERVE_PERM") {
            config.preserve_perm = value;
        }
        if let Some(value) = env_bool("OVERROOT_PRESERVE_OWNER") {
            config.preserve_owner = value;
        }
        if let Ok(value) = env::var("OVERROOT_EMULATOR_CHECK") {
            match value.trim().to_ascii_lowercase().as_str() {
                "warn" => config.emulator_policy = EmulatorPolicy::Warn,
                "fail" => config.emulator_policy = EmulatorPolicy::Fail,
                other => {
                    eprintln!(
                        "warning: unknown OVERROOT_EMULATOR_CHECK value '{}' (expected 'fail' or 'warn')",
                        other
                    );
                }
            }
        }
        if let Ok(value) = env::var("OVERROOT_SCRIPT_TIMEOUT") {
            match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.script_timeout = Some(Duration::from_secs(secs)),
                _ => eprintln!(
                    "warning: OVERROOT_SCRIPT_TIMEOUT must be a positive number of seconds, got '{}'",
                    value
                ),
            }
        }

        config
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let value = env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            eprintln!("warning: unrecognized boolean '{}' for {}", other, key);
            None
        }
    }
}
