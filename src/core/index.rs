//! Membership index for the proxy's hot path
//!
//! Each family keeps a sorted list of disjoint inclusive address ranges, so both
//! point entries and subnets answer with one binary search. An index value is
//! immutable; updates build a new one and publish it with a single swap.

use crate::core::address::{AddressFamily, NormalizedEntry, PerFamily};
use ipnetwork::IpNetwork;
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::warn;

/// Sorted, merged, inclusive ranges over an integer address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet<T> {
    ranges: Vec<(T, T)>,
}

impl<T> Default for RangeSet<T> {
    fn default() -> Self {
        Self { ranges: Vec::new() }
    }
}

impl<T: Copy + Ord> RangeSet<T> {
    pub fn from_ranges(mut ranges: Vec<(T, T)>) -> Self {
        ranges.sort_unstable();
        let mut merged: Vec<(T, T)> = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            match merged.last_mut() {
                Some(last) if start <= last.1 => {
                    if end > last.1 {
                        last.1 = end;
                    }
                }
                _ => merged.push((start, end)),
            }
        }
        Self { ranges: merged }
    }

    /// Returns a new set containing these ranges plus `more`.
    pub fn extended(&self, more: impl IntoIterator<Item = (T, T)>) -> Self {
        let mut ranges = self.ranges.clone();
        ranges.extend(more);
        Self::from_ranges(ranges)
    }

    pub fn contains(&self, value: T) -> bool {
        let idx = self.ranges.partition_point(|&(start, _)| start <= value);
        idx > 0 && self.ranges[idx - 1].1 >= value
    }

    /// True when `start..=end` lies entirely inside one stored range.
    pub fn covers(&self, start: T, end: T) -> bool {
        let idx = self.ranges.partition_point(|&(s, _)| s <= start);
        idx > 0 && self.ranges[idx - 1].1 >= end
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }
}

/// Inclusive bounds of one entry, tagged by family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryRange {
    V4(u32, u32),
    V6(u128, u128),
}

fn entry_range(entry: &NormalizedEntry) -> Option<EntryRange> {
    match entry.network()? {
        IpNetwork::V4(net) => Some(EntryRange::V4(
            u32::from(net.network()),
            u32::from(net.broadcast()),
        )),
        IpNetwork::V6(net) => Some(EntryRange::V6(
            u128::from(net.network()),
            u128::from(net.broadcast()),
        )),
    }
}

/// Bounds widened to `u128`, tagged with whether the entry is IPv6.
fn wide_bounds(entry: &NormalizedEntry) -> Option<(bool, u128, u128)> {
    Some(match entry_range(entry)? {
        EntryRange::V4(start, end) => (false, u128::from(start), u128::from(end)),
        EntryRange::V6(start, end) => (true, start, end),
    })
}

/// Drops entries that lie inside another entry of `entries`.
///
/// CIDR blocks either nest or are disjoint, so once sorted by start (widest
/// first) an entry is nested exactly when it starts before the furthest end kept
/// so far. Entries spelling the same block differently keep only the first.
pub fn outermost(entries: &BTreeSet<NormalizedEntry>) -> BTreeSet<NormalizedEntry> {
    let mut bounded: Vec<_> = entries
        .iter()
        .filter_map(|entry| wide_bounds(entry).map(|bounds| (bounds, entry)))
        .collect();
    bounded.sort_by_key(|&((v6, start, end), entry)| (v6, start, Reverse(end), entry));

    let mut kept = BTreeSet::new();
    let mut reach: Option<(bool, u128)> = None;
    for ((v6, start, end), entry) in bounded {
        if let Some((family, furthest)) = reach
            && family == v6
            && start <= furthest
        {
            continue;
        }
        reach = Some((v6, end));
        kept.insert(entry.clone());
    }
    kept
}

#[derive(Default)]
struct FamilyRanges {
    v4: Vec<(u32, u32)>,
    v6: Vec<(u128, u128)>,
}

fn collect_ranges<'a>(
    family: AddressFamily,
    entries: impl IntoIterator<Item = &'a NormalizedEntry>,
) -> FamilyRanges {
    let mut out = FamilyRanges::default();
    for entry in entries {
        match (family, entry_range(entry)) {
            (AddressFamily::V4, Some(EntryRange::V4(s, e))) => out.v4.push((s, e)),
            (AddressFamily::V6, Some(EntryRange::V6(s, e))) => out.v6.push((s, e)),
            _ => warn!("Ignoring entry '{entry}' that is not a valid {family} range"),
        }
    }
    out
}

/// Snapshot of banned ranges for both families.
#[derive(Debug, Clone, Default)]
pub struct MembershipIndex {
    v4: Arc<RangeSet<u32>>,
    v6: Arc<RangeSet<u128>>,
    entry_counts: PerFamily<usize>,
}

impl MembershipIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a copy with `family` rebuilt from scratch out of `entries`.
    /// The other family's ranges are shared, not copied.
    pub fn rebuilt<'a>(
        &self,
        family: AddressFamily,
        entries: impl IntoIterator<Item = &'a NormalizedEntry>,
    ) -> Self {
        let entries: Vec<&NormalizedEntry> = entries.into_iter().collect();
        let count = entries.len();
        let ranges = collect_ranges(family, entries);
        let mut next = self.clone();
        match family {
            AddressFamily::V4 => next.v4 = Arc::new(RangeSet::from_ranges(ranges.v4)),
            AddressFamily::V6 => next.v6 = Arc::new(RangeSet::from_ranges(ranges.v6)),
        }
        next.entry_counts[family] = count;
        next
    }

    /// Returns a copy with `entries` added to `family`.
    pub fn extended<'a>(
        &self,
        family: AddressFamily,
        entries: impl IntoIterator<Item = &'a NormalizedEntry>,
    ) -> Self {
        let entries: Vec<&NormalizedEntry> = entries.into_iter().collect();
        let count = entries.len();
        let ranges = collect_ranges(family, entries);
        let mut next = self.clone();
        match family {
            AddressFamily::V4 => next.v4 = Arc::new(self.v4.extended(ranges.v4)),
            AddressFamily::V6 => next.v6 = Arc::new(self.v6.extended(ranges.v6)),
        }
        next.entry_counts[family] += count;
        next
    }

    /// Returns a copy with `family` emptied.
    pub fn cleared(&self, family: AddressFamily) -> Self {
        self.rebuilt(family, std::iter::empty())
    }

    /// True when `address` equals a banned point entry or falls inside a banned subnet.
    /// Unparseable input is never banned.
    pub fn check(&self, address: &str) -> bool {
        address
            .trim()
            .parse::<IpAddr>()
            .is_ok_and(|addr| self.check_ip(addr))
    }

    pub fn check_ip(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => self.v4.contains(u32::from(v4)),
            IpAddr::V6(v6) => self.v6.contains(u128::from(v6)),
        }
    }

    /// True when every address of `entry` is already banned, possibly by
    /// a wider entry.
    pub fn covers(&self, entry: &NormalizedEntry) -> bool {
        match entry_range(entry) {
            Some(EntryRange::V4(start, end)) => self.v4.covers(start, end),
            Some(EntryRange::V6(start, end)) => self.v6.covers(start, end),
            None => false,
        }
    }

    /// Number of entries the family was built from.
    pub fn entry_count(&self, family: AddressFamily) -> usize {
        self.entry_counts[family]
    }
}
