//! Ban synchronization engine
//!
//! This module keeps two nftables sets in step with the ban lists a torrent
//! client receives, and answers "is this address banned?" without touching nft.
//!
//! - [`address`]: Classification and normalization of raw address tokens
//! - [`set_store`]: The in-process record of what is installed in each set
//! - [`index`]: Range index used for membership checks
//! - [`sync`]: Diffing and command emission against the external sets
//! - [`engine`]: The public [`engine::BanEngine`] handle
//! - [`executor`]: Running nft scripts
//! - [`bootstrap`]: Installing the ban table at startup
//! - [`verify`]: Script validation with `nft --check`
//! - [`error`]: Error types

pub mod address;
pub mod bootstrap;
pub mod engine;
pub mod error;
pub mod executor;
pub mod index;
pub(crate) mod serializer;
pub mod set_store;
pub mod sync;
pub mod verify;

#[cfg(test)]
pub mod test_helpers;

#[cfg(test)]
mod tests;
