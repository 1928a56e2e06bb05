//! Input validation and sanitization functions for nftban
//!
//! Everything that ends up inside an nft script or is taken from an untrusted
//! request goes through here first.

use std::net::IpAddr;

/// Maximum length of a set reference such as `inet pbh_qbt_helper ipv4_ban_ips`.
const MAX_SET_NAME_LEN: usize = 128;

/// Validates an nft set reference (`<family> <table> <set>`).
///
/// Only ASCII alphanumerics, `_`, `-`, `.` and single spaces between words are
/// accepted, so a set name can never smuggle extra statements into a script.
///
/// # Examples
///
/// ```
/// use nftban::validators::validate_set_name;
///
/// assert!(validate_set_name("inet pbh_qbt_helper ipv4_ban_ips").is_ok());
/// assert!(validate_set_name("inet t s; flush ruleset").is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` if the name is empty, too long, or contains invalid characters.
pub fn validate_set_name(name: &str) -> Result<String, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Set name cannot be empty".to_string());
    }

    if name.len() > MAX_SET_NAME_LEN {
        return Err(format!("Set name too long (max {MAX_SET_NAME_LEN} characters)"));
    }

    // SECURITY: ASCII-only; no braces, semicolons or newlines may reach nft
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-' | '.'))
    {
        return Err(format!("Set name '{name}' contains invalid characters"));
    }

    if name.contains("  ") {
        return Err(format!("Set name '{name}' contains repeated spaces"));
    }

    Ok(name.to_string())
}

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Validates the cgroup ancestor level used to match the client's traffic.
///
/// nft accepts `socket cgroupv2 level` values from 1 to 255.
///
/// # Errors
///
/// Returns `Err` if the level is 0.
pub fn validate_cgroup_level(level: u8) -> Result<u8, String> {
    if level == 0 {
        Err("cgroup level must be between 1 and 255".to_string())
    } else {
        Ok(level)
    }
}

/// Extracts the IP address from a peer token as sent by PeerBanHelper.
///
/// Accepted forms are `[v6]:port`, `v4:port` and a bare address of either
/// family. Returns `None` when no address can be recovered.
///
/// # Examples
///
/// ```
/// use nftban::validators::extract_peer_ip;
///
/// assert_eq!(extract_peer_ip("203.0.113.5:6881"), Some("203.0.113.5"));
/// assert_eq!(extract_peer_ip("[2001:db8::1]:6881"), Some("2001:db8::1"));
/// assert_eq!(extract_peer_ip("2001:db8::1"), Some("2001:db8::1"));
/// assert_eq!(extract_peer_ip(""), None);
/// ```
pub fn extract_peer_ip(peer: &str) -> Option<&str> {
    let peer = peer.trim();
    if let Some(rest) = peer.strip_prefix('[') {
        let (addr, _) = rest.split_once(']')?;
        return (!addr.is_empty()).then_some(addr);
    }

    if peer.parse::<IpAddr>().is_ok() {
        return Some(peer);
    }

    let (host, _port) = peer.rsplit_once(':')?;
    (!host.is_empty()).then_some(host)
}

/// Checks whether an upstream endpoint uses a scheme the proxy can forward to.
///
/// # Errors
///
/// Returns `Err` for anything other than a plain `http://` URL with a host.
pub fn validate_upstream(endpoint: &url::Url) -> Result<(), String> {
    if endpoint.scheme() != "http" {
        return Err(format!(
            "Unsupported upstream scheme '{}' (only http is supported)",
            endpoint.scheme()
        ));
    }
    if endpoint.host_str().is_none_or(str::is_empty) {
        return Err("Upstream endpoint has no host".to_string());
    }
    Ok(())
}
