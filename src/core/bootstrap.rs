//! Firewall bootstrap
//!
//! Renders the embedded table template and installs it once at startup. The
//! template creates `inet pbh_qbt_helper` with both ban sets and the chains that
//! drop traffic between the torrent client and banned addresses.

use crate::core::error::{Error, Result};
use crate::core::executor::{CommandExecutor, NftExecutor};
use crate::core::verify::verify_script;
use tracing::{debug, info};

/// Table template shipped with the binary.
pub const TEMPLATE: &str = include_str!("../../assets/nftban.nft");

/// Set references created by [`TEMPLATE`].
pub const DEFAULT_IPV4_SET: &str = "inet pbh_qbt_helper ipv4_ban_ips";
pub const DEFAULT_IPV6_SET: &str = "inet pbh_qbt_helper ipv6_ban_ips";

const PORT_PLACEHOLDER: &str = "%QBT_PORT%";
const CGROUP_LEVEL_PLACEHOLDER: &str = "%QBT_CGROUP_LEVEL%";
const CGROUP_PLACEHOLDER: &str = "%QBT_CGROUP%";

/// Values substituted into the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapParams {
    /// Peer port the torrent client listens on.
    pub peer_port: u16,
    /// Ancestor level for the `socket cgroupv2` match.
    pub cgroup_level: u8,
    /// cgroup path of the torrent client. Without it the cgroup rules are left out.
    pub cgroup_path: Option<String>,
}

/// Fills the placeholders in `template`.
///
/// Lines that reference the cgroup path are dropped when no path is configured.
pub fn render(template: &str, params: &BootstrapParams) -> String {
    let port = params.peer_port.to_string();
    let level = params.cgroup_level.to_string();

    let mut script = String::with_capacity(template.len());
    for line in template.lines() {
        let line = match (&params.cgroup_path, line.contains(CGROUP_PLACEHOLDER)) {
            (None, true) => continue,
            (Some(path), true) => line.replace(CGROUP_PLACEHOLDER, path),
            (_, false) => line.to_string(),
        };
        script.push_str(
            &line
                .replace(PORT_PLACEHOLDER, &port)
                .replace(CGROUP_LEVEL_PLACEHOLDER, &level),
        );
        script.push('\n');
    }
    script
}

/// Checks the rendered script with `nft --check`, then applies it.
///
/// # Errors
///
/// Returns `Err` if verification rejects the script or applying it fails.
pub async fn install(executor: &NftExecutor, params: &BootstrapParams) -> Result<()> {
    let script = render(TEMPLATE, params);
    debug!("Bootstrap script:\n{script}");

    let verification = verify_script(executor, &script).await?;
    if !verification.success {
        return Err(Error::Nftables {
            message: format!(
                "Bootstrap script rejected: {}",
                verification.errors.join("; ")
            ),
            stderr: Some(verification.errors.join("\n")),
            exit_code: None,
        });
    }

    executor.execute(&script).await?;
    info!(
        "Installed ban table (peer port {}, cgroup level {})",
        params.peer_port, params.cgroup_level
    );
    Ok(())
}
