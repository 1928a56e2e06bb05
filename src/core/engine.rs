//! IP ban synchronization engine
//!
//! Public face of the ban machinery. Mutations (`append`, `replace`, `flush`) are
//! queued through the operation serializer and resolve once the external filter
//! and the in-process state agree. `check` reads the latest published membership
//! index directly and never waits for the queue.
//!
//! # Example
//!
//! ```no_run
//! use nftban::core::engine::BanEngine;
//! use nftban::core::executor::NftExecutor;
//! use nftban::core::sync::FirewallSetBinding;
//!
//! # async fn example() -> nftban::Result<()> {
//! let binding = FirewallSetBinding::new(
//!     "inet pbh_qbt_helper ipv4_ban_ips",
//!     "inet pbh_qbt_helper ipv6_ban_ips",
//! )?;
//! let engine = BanEngine::new(binding, NftExecutor::new(vec!["nft".into()])?);
//!
//! engine.append(["203.0.113.5"]).await?;
//! assert!(engine.check("203.0.113.5"));
//! # Ok(())
//! # }
//! ```

use crate::core::address::{AddressFamily, PerFamily};
use crate::core::error::Result;
use crate::core::executor::CommandExecutor;
use crate::core::index::MembershipIndex;
use crate::core::serializer::{Operation, OperationSerializer};
use crate::core::sync::{FirewallSetBinding, FirewallSynchronizer};
use std::sync::Arc;
use tokio::sync::watch;

/// Default number of operations that may wait in the queue before submitters block.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Handle to one engine instance. Cloning shares the same queue and index.
#[derive(Clone)]
pub struct BanEngine {
    operations: OperationSerializer,
    index: watch::Receiver<Arc<MembershipIndex>>,
}

impl BanEngine {
    /// Creates an engine with empty sets and starts its worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<E: CommandExecutor>(binding: FirewallSetBinding, executor: E) -> Self {
        Self::with_queue_depth(binding, executor, DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth<E: CommandExecutor>(
        binding: FirewallSetBinding,
        executor: E,
        depth: usize,
    ) -> Self {
        let (publisher, index) = watch::channel(Arc::new(MembershipIndex::empty()));
        let synchronizer = FirewallSynchronizer::new(executor, binding, publisher);
        Self {
            operations: OperationSerializer::spawn(synchronizer, depth),
            index,
        }
    }

    /// Bans the given addresses in addition to everything already banned.
    ///
    /// Malformed tokens are skipped. Bare IPv6 addresses are banned as their `/64`.
    ///
    /// # Errors
    ///
    /// Returns the first executor failure; families that succeeded stay committed.
    pub async fn append<I, S>(&self, addresses: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let raw = addresses.into_iter().map(Into::into).collect();
        self.operations.submit(Operation::Append(raw)).await
    }

    /// Makes the banned set exactly the given addresses. An empty result after
    /// normalization flushes both families.
    ///
    /// # Errors
    ///
    /// Returns the first executor failure; each family keeps its last committed state.
    pub async fn replace<I, S>(&self, addresses: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let raw = addresses.into_iter().map(Into::into).collect();
        self.operations.submit(Operation::Replace(raw)).await
    }

    /// Removes every ban from both families.
    ///
    /// # Errors
    ///
    /// Returns the first executor failure.
    pub async fn flush(&self) -> Result<()> {
        self.operations.submit(Operation::Flush).await
    }

    /// Whether `address` is covered by a committed ban. Never blocks on the queue.
    ///
    /// The `watch` read guard is held only long enough to clone the snapshot's
    /// `Arc`; the lookup itself runs on the snapshot with no lock held, and a
    /// publish in between is seen either whole or not at all.
    pub fn check(&self, address: &str) -> bool {
        self.snapshot().check(address)
    }

    fn snapshot(&self) -> Arc<MembershipIndex> {
        Arc::clone(&self.index.borrow())
    }

    /// Current number of committed entries per family.
    pub fn entry_counts(&self) -> PerFamily<usize> {
        let index = self.snapshot();
        PerFamily::new(
            index.entry_count(AddressFamily::V4),
            index.entry_count(AddressFamily::V6),
        )
    }
}
