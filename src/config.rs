//! Runtime configuration
//!
//! Command-line flags (each backed by an environment variable) are parsed once by
//! clap into [`ServeArgs`] and validated into an immutable [`Config`], which is
//! passed explicitly to the engine, the proxy and the bootstrap step.

use crate::core::bootstrap::{BootstrapParams, DEFAULT_IPV4_SET, DEFAULT_IPV6_SET};
use crate::core::error::{Error, Result};
use crate::core::sync::FirewallSetBinding;
use crate::elevation::Elevation;
use crate::validators::{validate_cgroup_level, validate_port, validate_upstream};
use clap::Args;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Flags for the `serve` command.
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address the proxy listens on
    #[arg(long, env = "NFTBAN_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port the proxy listens on
    #[arg(long, env = "HTTP_PORT", default_value_t = 19830)]
    pub port: u16,

    /// qBittorrent WebUI endpoint requests are forwarded to
    #[arg(long, env = "QBT_ENDPOINT", default_value = "http://127.0.0.1:8080")]
    pub upstream: Url,

    /// Manage the ban sets with nftables (yes/no)
    #[arg(
        long,
        env = "USE_NFTABLES",
        default_value = "no",
        value_parser = parse_switch,
        action = clap::ArgAction::Set
    )]
    pub use_nftables: bool,

    /// Peer port of the torrent client
    #[arg(long, env = "QBT_PEER_PORT", default_value_t = 6881)]
    pub peer_port: u16,

    /// cgroupv2 ancestor level of the torrent client
    #[arg(long, env = "QBT_CGROUP_LEVEL", default_value_t = 2)]
    pub cgroup_level: u8,

    /// cgroupv2 path of the torrent client, e.g. `system.slice/qbittorrent.service`
    #[arg(long, env = "QBT_CGROUP")]
    pub cgroup_path: Option<String>,

    /// Do not install the ban table at startup (the sets must already exist)
    #[arg(long, env = "NFTBAN_SKIP_BOOTSTRAP")]
    pub skip_bootstrap: bool,

    /// nft set receiving IPv4 bans
    #[arg(long, env = "NFTBAN_IPV4_SET", default_value = DEFAULT_IPV4_SET)]
    pub ipv4_set: String,

    /// nft set receiving IPv6 bans
    #[arg(long, env = "NFTBAN_IPV6_SET", default_value = DEFAULT_IPV6_SET)]
    pub ipv6_set: String,

    /// Command used to run nft (split on whitespace)
    #[arg(long, env = "NFTBAN_NFT_COMMAND", default_value = "nft")]
    pub nft_command: String,

    /// How to gain privileges for nft
    #[arg(long, env = "NFTBAN_ELEVATION", value_enum, default_value_t = Elevation::Auto)]
    pub elevation: Elevation,

    /// Burst size of the POST rate limiter
    #[arg(long, env = "NFTBAN_RATE_LIMIT_TOKENS", default_value_t = 10)]
    pub rate_limit_tokens: u32,

    /// Seconds between rate limiter refills
    #[arg(long, env = "NFTBAN_RATE_LIMIT_INTERVAL", default_value_t = 3)]
    pub rate_limit_interval: u64,

    /// Tokens added per refill
    #[arg(long, env = "NFTBAN_RATE_LIMIT_REFILL", default_value_t = 1)]
    pub rate_limit_refill: u32,

    /// Largest accepted POST body in bytes
    #[arg(long, env = "NFTBAN_BODY_LIMIT", default_value_t = 10 * 1024 * 1024)]
    pub body_limit: usize,

    /// Upstream request timeout in seconds
    #[arg(long, env = "NFTBAN_UPSTREAM_TIMEOUT", default_value_t = 10)]
    pub upstream_timeout: u64,

    /// Operations that may wait for the engine before callers block
    #[arg(long, env = "NFTBAN_QUEUE_DEPTH", default_value_t = crate::core::engine::DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,

    /// Audit log location [default: <state dir>/nftban/audit.log]
    #[arg(long, env = "NFTBAN_AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,
}

/// Accepts the usual spellings of a boolean switch.
fn parse_switch(value: &str) -> std::result::Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "1" | "on" => Ok(true),
        "no" | "n" | "false" | "0" | "off" | "" => Ok(false),
        other => Err(format!("expected yes or no, got '{other}'")),
    }
}

/// Token bucket settings for POST requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_tokens: u32,
    pub refill_interval: Duration,
    pub tokens_per_refill: u32,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub upstream: Url,
    /// False on non-Linux hosts regardless of the flag.
    pub use_nftables: bool,
    /// Template values for the ban table.
    pub table: BootstrapParams,
    /// Whether the ban table is installed at startup.
    pub install_table: bool,
    pub binding: FirewallSetBinding,
    pub nft_command: Vec<String>,
    pub elevation: Elevation,
    pub rate_limit: RateLimit,
    pub body_limit: usize,
    pub upstream_timeout: Duration,
    pub queue_depth: usize,
    pub audit_path: PathBuf,
}

impl Config {
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn from_args(args: ServeArgs) -> Result<Self> {
        validate_upstream(&args.upstream).map_err(Error::Config)?;
        validate_port(args.peer_port).map_err(Error::Config)?;
        validate_cgroup_level(args.cgroup_level).map_err(Error::Config)?;

        let cgroup_path = match args.cgroup_path.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(path) => Some(validate_cgroup_path(path)?),
        };

        let nft_command: Vec<String> = args
            .nft_command
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if nft_command.is_empty() {
            return Err(Error::Config("nft command cannot be empty".to_string()));
        }

        if args.queue_depth == 0 {
            return Err(Error::Config("Queue depth must be at least 1".to_string()));
        }
        if args.rate_limit_tokens == 0 || args.rate_limit_refill == 0 {
            return Err(Error::Config(
                "Rate limit tokens and refill must be at least 1".to_string(),
            ));
        }
        if args.rate_limit_interval == 0 {
            return Err(Error::Config(
                "Rate limit interval must be at least 1 second".to_string(),
            ));
        }
        if args.upstream_timeout == 0 {
            return Err(Error::Config(
                "Upstream timeout must be at least 1 second".to_string(),
            ));
        }

        let use_nftables = args.use_nftables && cfg!(target_os = "linux");
        if args.use_nftables && !use_nftables {
            warn!("nftables is only available on Linux; ban handling disabled");
        }

        let install_table = use_nftables && !args.skip_bootstrap;
        if install_table
            && (args.ipv4_set != DEFAULT_IPV4_SET || args.ipv6_set != DEFAULT_IPV6_SET)
        {
            warn!(
                "Custom set names are not created by the bootstrap table; \
                 use --skip-bootstrap if they are managed elsewhere"
            );
        }

        Ok(Self {
            listen: SocketAddr::new(args.bind, args.port),
            upstream: args.upstream,
            use_nftables,
            table: BootstrapParams {
                peer_port: args.peer_port,
                cgroup_level: args.cgroup_level,
                cgroup_path,
            },
            install_table,
            binding: FirewallSetBinding::new(args.ipv4_set, args.ipv6_set)?,
            nft_command,
            elevation: args.elevation,
            rate_limit: RateLimit {
                max_tokens: args.rate_limit_tokens,
                refill_interval: Duration::from_secs(args.rate_limit_interval),
                tokens_per_refill: args.rate_limit_refill,
            },
            body_limit: args.body_limit,
            upstream_timeout: Duration::from_secs(args.upstream_timeout),
            queue_depth: args.queue_depth,
            audit_path: args
                .audit_log
                .unwrap_or_else(crate::utils::default_audit_path),
        })
    }
}

/// cgroup paths end up inside a quoted nft string.
fn validate_cgroup_path(path: &str) -> Result<String> {
    if path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '-' | '_' | '@' | ':'))
    {
        Ok(path.to_string())
    } else {
        Err(Error::Config(format!(
            "cgroup path '{path}' contains invalid characters"
        )))
    }
}
