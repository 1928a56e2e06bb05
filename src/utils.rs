//! Utility functions for directory management
//!
//! Follows the XDG Base Directory specification. nftban only keeps runtime state:
//!
//! - State: `~/.local/state/nftban/` - Audit log
//!
//! When running as root without a home directory, `/var/lib/nftban` is used.
//!
//! # Example
//!
//! ```
//! use nftban::utils::get_state_dir;
//!
//! let audit_path = get_state_dir().join("audit.log");
//! assert!(audit_path.ends_with("nftban/audit.log"));
//! ```

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const SYSTEM_STATE_DIR: &str = "/var/lib/nftban";

pub fn get_state_dir() -> PathBuf {
    ProjectDirs::from("com", "nftban", "nftban")
        .and_then(|pd| pd.state_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from(SYSTEM_STATE_DIR))
}

/// Default location of the audit log.
pub fn default_audit_path() -> PathBuf {
    get_state_dir().join("audit.log")
}

/// Creates `dir` and its parents, private to the current user.
pub fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        DirBuilder::new()
            .mode(0o700) // User read/write/execute only
            .recursive(true)
            .create(dir)
    }

    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
    }
}
