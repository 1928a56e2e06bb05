//! Firewall synchronizer
//!
//! Diffs candidate entries against the authoritative sets, sends the minimal
//! add/delete/flush commands, and commits to the sets and the membership index
//! only after the executor acknowledged the command. Each family is handled as
//! its own sub-transaction: a failure in one family leaves the other's commit in
//! place, and the first failure is what the caller sees.
//!
//! The nft sets are `auto-merge` interval sets, so the kernel folds an element
//! into any block that already covers it. The authoritative sets therefore never
//! hold an entry nested inside another one; otherwise a later `delete element`
//! for the inner entry would punch a hole into the outer block.

use crate::core::address::{AddressFamily, EntrySets, NormalizedEntry, PerFamily, normalize_batch};
use crate::core::error::{Error, Result};
use crate::core::executor::CommandExecutor;
use crate::core::index::{MembershipIndex, outermost};
use crate::core::set_store::AuthoritativeSet;
use crate::validators::validate_set_name;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Names of the external sets this engine instance manages, one per family.
///
/// Names are the nft set references as written after `add element`, e.g.
/// `inet pbh_qbt_helper ipv4_ban_ips`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallSetBinding {
    names: PerFamily<String>,
}

impl FirewallSetBinding {
    /// # Errors
    ///
    /// Returns `Err` if either name is not a plain nft set reference.
    pub fn new(ipv4: impl Into<String>, ipv6: impl Into<String>) -> Result<Self> {
        let ipv4 = validate_set_name(&ipv4.into()).map_err(Error::Config)?;
        let ipv6 = validate_set_name(&ipv6.into()).map_err(Error::Config)?;
        Ok(Self {
            names: PerFamily::new(ipv4, ipv6),
        })
    }

    pub fn set_name(&self, family: AddressFamily) -> &str {
        &self.names[family]
    }
}

/// One nft command against a ban set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetCommand<'a> {
    AddElements {
        set: &'a str,
        entries: &'a BTreeSet<NormalizedEntry>,
    },
    DeleteElements {
        set: &'a str,
        entries: &'a BTreeSet<NormalizedEntry>,
    },
    FlushSet {
        set: &'a str,
    },
}

impl<'a> SetCommand<'a> {
    /// `None` when there is nothing to add; nft never sees an empty element list.
    pub fn add(set: &'a str, entries: &'a BTreeSet<NormalizedEntry>) -> Option<Self> {
        (!entries.is_empty()).then_some(Self::AddElements { set, entries })
    }

    /// `None` when there is nothing to delete.
    pub fn delete(set: &'a str, entries: &'a BTreeSet<NormalizedEntry>) -> Option<Self> {
        (!entries.is_empty()).then_some(Self::DeleteElements { set, entries })
    }

    pub fn flush(set: &'a str) -> Self {
        Self::FlushSet { set }
    }
}

fn join_entries(entries: &BTreeSet<NormalizedEntry>) -> String {
    entries
        .iter()
        .map(NormalizedEntry::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for SetCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddElements { set, entries } => {
                write!(f, "add element {set} {{ {} }}", join_entries(entries))
            }
            Self::DeleteElements { set, entries } => {
                write!(f, "delete element {set} {{ {} }}", join_entries(entries))
            }
            Self::FlushSet { set } => write!(f, "flush set {set}"),
        }
    }
}

/// Owns the authoritative sets and publishes membership index snapshots.
///
/// Lives inside the serializer's single worker; nothing else mutates it.
pub(crate) struct FirewallSynchronizer<E> {
    executor: E,
    binding: FirewallSetBinding,
    sets: PerFamily<AuthoritativeSet>,
    index: watch::Sender<Arc<MembershipIndex>>,
}

impl<E: CommandExecutor> FirewallSynchronizer<E> {
    pub(crate) fn new(
        executor: E,
        binding: FirewallSetBinding,
        index: watch::Sender<Arc<MembershipIndex>>,
    ) -> Self {
        Self {
            executor,
            binding,
            sets: PerFamily::default(),
            index,
        }
    }

    async fn run(&self, family: AddressFamily, command: &SetCommand<'_>) -> Result<()> {
        let script = command.to_string();
        self.executor.execute(&script).await.inspect_err(|e| {
            error!("{family} command failed: {e}");
        })
    }

    fn publish(&self, update: impl FnOnce(&MembershipIndex) -> MembershipIndex) {
        let next = update(&self.index.borrow());
        self.index.send_replace(Arc::new(next));
    }

    fn rebuild_index(&self, family: AddressFamily) {
        let sets = &self.sets;
        self.publish(|index| index.rebuilt(family, sets[family].iter()));
    }

    /// Adds entries that are not yet installed and extends the index with them.
    pub(crate) async fn append<S: AsRef<str>>(&mut self, raw: &[S]) -> Result<()> {
        let candidate = normalize_batch(raw);
        let mut first_error = None;

        for family in AddressFamily::ALL {
            let installed = Arc::clone(&self.index.borrow());
            let added: BTreeSet<NormalizedEntry> = self.sets[family]
                .diff_added(&outermost(&candidate[family]))
                .into_iter()
                .filter(|entry| !installed.covers(entry))
                .collect();
            let set = self.binding.set_name(family);
            let Some(command) = SetCommand::add(set, &added) else {
                debug!("append: nothing new for {family}");
                continue;
            };

            let result = self.run(family, &command).await;
            match result {
                Ok(()) => {
                    self.sets[family].add(added.iter().cloned());
                    let absorbed = self.absorb(family, &added);
                    if absorbed == 0 {
                        self.publish(|index| index.extended(family, &added));
                    } else {
                        debug!("append: {absorbed} {family} entries absorbed by wider blocks");
                        self.rebuild_index(family);
                    }
                    info!("Banned {} new {family} entries", added.len());
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Drops committed entries that now sit inside one of `wider`.
    fn absorb(&mut self, family: AddressFamily, wider: &BTreeSet<NormalizedEntry>) -> usize {
        let cover = MembershipIndex::empty().rebuilt(family, wider);
        self.sets[family].retain(|entry| wider.contains(entry) || !cover.covers(entry))
    }

    /// Makes the installed sets equal to the candidate; an empty candidate flushes.
    pub(crate) async fn replace<S: AsRef<str>>(&mut self, raw: &[S]) -> Result<()> {
        let candidate = normalize_batch(raw);
        if candidate.is_empty() {
            info!("replace: empty ban list, flushing");
            return self.flush().await;
        }

        let mut first_error = None;
        for family in AddressFamily::ALL {
            if let Err(e) = self.replace_family(family, &candidate).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn replace_family(&mut self, family: AddressFamily, candidate: &EntrySets) -> Result<()> {
        let wanted = outermost(&candidate[family]);
        let removed = self.sets[family].diff_removed(&wanted);
        let added = self.sets[family].diff_added(&wanted);
        let set = self.binding.set_name(family).to_string();
        let mut changed = false;
        let mut outcome = Ok(());

        if let Some(command) = SetCommand::delete(&set, &removed) {
            outcome = self.run(family, &command).await;
            if outcome.is_ok() {
                self.sets[family].remove(&removed);
                changed = true;
            }
        }
        if outcome.is_ok()
            && let Some(command) = SetCommand::add(&set, &added)
        {
            outcome = self.run(family, &command).await;
            if outcome.is_ok() {
                self.sets[family].add(added.iter().cloned());
                changed = true;
            }
        }

        // A delete that landed before a failed add still changed the set
        if changed {
            self.rebuild_index(family);
            info!(
                "Replaced {family} bans: -{} +{} ({} total)",
                removed.len(),
                added.len(),
                self.sets[family].len()
            );
        } else if outcome.is_ok() {
            debug!("replace: {family} already up to date");
        }
        outcome
    }

    /// Flushes both external sets, clearing each family after its flush succeeded.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        let mut first_error = None;
        for family in AddressFamily::ALL {
            let command = SetCommand::flush(self.binding.set_name(family));
            let result = self.run(family, &command).await;
            match result {
                Ok(()) => {
                    self.sets[family].clear();
                    self.publish(|index| index.cleared(family));
                    info!("Flushed {family} bans");
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
