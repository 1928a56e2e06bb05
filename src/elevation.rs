//! Privilege elevation for nft invocations
//!
//! nftban normally runs as root next to the torrent client. When it does not,
//! the configured `nft` command line is prefixed with an elevation helper once at
//! startup, and every ban command reuses that prefix.
//!
//! # Methods
//!
//! - **auto**: run directly when the effective uid is root, otherwise prefer `run0`
//!   (systemd v256+, no SUID), then non-interactive `sudo -n`
//! - **none**: never elevate (root, CAP_NET_ADMIN, or test doubles)
//! - **sudo** / **run0**: force one helper; fails if its binary is missing
//!
//! # Security
//!
//! - Arguments are passed to the process directly, never through a shell
//! - Only the configured command prefix is elevated

use tracing::warn;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// The command line to elevate is empty
    #[error("nft command line is empty")]
    EmptyCommand,
}

/// How nft commands obtain root privileges
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Elevation {
    #[default]
    Auto,
    None,
    Sudo,
    Run0,
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

fn prefixed(helper: &[&str], command: &[String]) -> Vec<String> {
    helper
        .iter()
        .map(|s| (*s).to_string())
        .chain(command.iter().cloned())
        .collect()
}

/// Resolves the final argv for nft commands.
///
/// # Errors
///
/// Returns `Err` if `command` is empty or a forced method's helper binary is missing.
pub fn elevated_command_line(
    command: &[String],
    method: Elevation,
) -> Result<Vec<String>, ElevationError> {
    if command.is_empty() {
        return Err(ElevationError::EmptyCommand);
    }

    match method {
        Elevation::None => Ok(command.to_vec()),
        Elevation::Sudo => {
            if !binary_exists("sudo") {
                return Err(ElevationError::MethodNotAvailable("sudo".into()));
            }
            Ok(prefixed(&["sudo", "-n"], command))
        }
        Elevation::Run0 => {
            if !binary_exists("run0") {
                return Err(ElevationError::MethodNotAvailable("run0".into()));
            }
            Ok(prefixed(&["run0"], command))
        }
        Elevation::Auto => {
            if nix::unistd::geteuid().is_root() {
                return Ok(command.to_vec());
            }
            if binary_exists("run0") {
                return Ok(prefixed(&["run0"], command));
            }
            if binary_exists("sudo") {
                return Ok(prefixed(&["sudo", "-n"], command));
            }
            warn!("Not running as root and neither run0 nor sudo found; running nft directly");
            Ok(command.to_vec())
        }
    }
}
