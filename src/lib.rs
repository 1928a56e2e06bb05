//! nftban - qBittorrent ban sidecar for nftables
//!
//! Sits between PeerBanHelper and the qBittorrent WebUI, turning ban requests
//! into nftables set updates and hiding banned peers from the client's peer list.
//!
//! # Architecture
//!
//! - [`core`] - Ban engine: address normalization, set synchronization, membership index
//! - [`proxy`] - HTTP reverse proxy and ban request handlers
//! - [`audit`] - Audit logging for all firewall changes
//! - [`validators`] - Input validation and sanitization
//! - [`config`] - Command-line and environment configuration
//! - [`elevation`] - Running nft with sudo or run0
//! - [`utils`] - Utility functions (XDG directories)
//!
//! # Safety Features
//!
//! - Every mutation goes through one serialized queue
//! - In-process state is committed only after nft accepted the change
//! - Set names and peer tokens are validated before they reach an nft script
//! - The bootstrap table is checked with `nft --check` before it is applied

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod proxy;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::engine::BanEngine;
pub use core::error::{Error, Result};
