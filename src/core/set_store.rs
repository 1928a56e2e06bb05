//! Authoritative ban set
//!
//! Mirrors what has been acknowledged by the external filter for one family.
//! Only the synchronizer mutates it, and only after a command succeeded.

use crate::core::address::NormalizedEntry;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct AuthoritativeSet {
    entries: BTreeSet<NormalizedEntry>,
}

impl AuthoritativeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, entry: &NormalizedEntry) -> bool {
        self.entries.contains(entry)
    }

    pub fn add<I: IntoIterator<Item = NormalizedEntry>>(&mut self, entries: I) {
        self.entries.extend(entries);
    }

    pub fn remove<'a, I: IntoIterator<Item = &'a NormalizedEntry>>(&mut self, entries: I) {
        for entry in entries {
            self.entries.remove(entry);
        }
    }

    /// Keeps only entries for which `keep` is true; returns how many were dropped.
    pub fn retain(&mut self, keep: impl FnMut(&NormalizedEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(keep);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries in `candidate` that are not installed yet.
    pub fn diff_added(&self, candidate: &BTreeSet<NormalizedEntry>) -> BTreeSet<NormalizedEntry> {
        candidate.difference(&self.entries).cloned().collect()
    }

    /// Installed entries that `candidate` no longer contains.
    pub fn diff_removed(
        &self,
        candidate: &BTreeSet<NormalizedEntry>,
    ) -> BTreeSet<NormalizedEntry> {
        self.entries.difference(candidate).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NormalizedEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::classify;

    fn set_of(items: &[&str]) -> BTreeSet<NormalizedEntry> {
        items.iter().map(|s| classify(s).unwrap().entry).collect()
    }

    #[test]
    fn test_diff_against_empty_store() {
        let store = AuthoritativeSet::new();
        let candidate = set_of(&["192.0.2.1", "192.0.2.2"]);
        assert_eq!(store.diff_added(&candidate), candidate);
        assert!(store.diff_removed(&candidate).is_empty());
    }

    #[test]
    fn test_diff_split() {
        let mut store = AuthoritativeSet::new();
        store.add(set_of(&["192.0.2.1", "192.0.2.2"]));

        let candidate = set_of(&["192.0.2.2", "192.0.2.3"]);
        assert_eq!(store.diff_added(&candidate), set_of(&["192.0.2.3"]));
        assert_eq!(store.diff_removed(&candidate), set_of(&["192.0.2.1"]));
    }

    #[test]
    fn test_add_remove_clear() {
        let mut store = AuthoritativeSet::new();
        let entries = set_of(&["192.0.2.1", "198.51.100.0/24"]);
        store.add(entries.clone());
        assert_eq!(store.len(), 2);
        assert!(store.contains(&classify("198.51.100.0/24").unwrap().entry));

        store.remove(&set_of(&["192.0.2.1"]));
        assert_eq!(store.len(), 1);
        assert!(!store.contains(&classify("192.0.2.1").unwrap().entry));

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_retain_reports_dropped() {
        let mut store = AuthoritativeSet::new();
        store.add(set_of(&["192.0.2.1", "192.0.2.2", "198.51.100.0/24"]));

        let dropped = store.retain(|e| e.as_str().starts_with("198."));
        assert_eq!(dropped, 2);
        assert_eq!(store.len(), 1);
    }
}
