//! Address classification and normalization
//!
//! Turns raw address tokens into [`NormalizedEntry`] values partitioned by
//! [`AddressFamily`]. Two policies exist:
//!
//! - [`classify`] keeps the address (or explicit subnet) as precise as it was given.
//! - [`aggregate`] applies the peer policy: bare IPv6 addresses collapse into their
//!   `/64` prefix, and addresses whose first group is zero are dropped.

use crate::core::error::{Error, Result};
use ipnetwork::IpNetwork;
use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::ops::{Index, IndexMut};
use tracing::debug;

/// Prefix length used when collapsing peer IPv6 addresses into one filter entry.
pub const IPV6_AGGREGATE_PREFIX: u8 = 64;

/// Protocol family partition. Entries of one family never meet the other's structures.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum AddressFamily {
    #[strum(serialize = "ipv4")]
    V4,
    #[strum(serialize = "ipv6")]
    V6,
}

impl AddressFamily {
    /// Processing order used by every multi-family operation.
    pub const ALL: [AddressFamily; 2] = [AddressFamily::V4, AddressFamily::V6];

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Longest valid prefix length for this family
    pub fn max_prefix(self) -> u8 {
        match self {
            Self::V4 => 32,
            Self::V6 => 128,
        }
    }
}

/// One value per address family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerFamily<T> {
    pub v4: T,
    pub v6: T,
}

impl<T> PerFamily<T> {
    pub fn new(v4: T, v6: T) -> Self {
        Self { v4, v6 }
    }
}

impl<T> Index<AddressFamily> for PerFamily<T> {
    type Output = T;

    fn index(&self, family: AddressFamily) -> &T {
        match family {
            AddressFamily::V4 => &self.v4,
            AddressFamily::V6 => &self.v6,
        }
    }
}

impl<T> IndexMut<AddressFamily> for PerFamily<T> {
    fn index_mut(&mut self, family: AddressFamily) -> &mut T {
        match family {
            AddressFamily::V4 => &mut self.v4,
            AddressFamily::V6 => &mut self.v6,
        }
    }
}

/// Canonical textual form of a single address or CIDR subnet.
///
/// Equality is plain string equality on the canonical form, so `fe80::1` and
/// `fe80:0:0:0:0:0:0:1` normalize to the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedEntry(String);

impl NormalizedEntry {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The network this entry covers; a point entry is a full-length prefix.
    pub fn network(&self) -> Option<IpNetwork> {
        let (addr, prefix) = match self.0.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (self.0.as_str(), None),
        };
        let addr: IpAddr = addr.parse().ok()?;
        let prefix = match prefix {
            Some(p) => p.parse().ok()?,
            None => AddressFamily::of(&addr).max_prefix(),
        };
        IpNetwork::new(addr, prefix).ok()
    }
}

impl fmt::Display for NormalizedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A classified entry together with its family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEntry {
    pub family: AddressFamily,
    pub entry: NormalizedEntry,
}

/// Per-family candidate sets built from one batch of raw tokens.
pub type EntrySets = PerFamily<BTreeSet<NormalizedEntry>>;

impl EntrySets {
    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }
}

/// Expands an IPv6 address into eight zero-padded 16-bit groups.
///
/// ```
/// use nftban::core::address::expand_ipv6;
///
/// let addr = "fe80::1".parse().unwrap();
/// assert_eq!(expand_ipv6(&addr), "fe80:0000:0000:0000:0000:0000:0000:0001");
/// ```
pub fn expand_ipv6(addr: &Ipv6Addr) -> String {
    expanded_groups(addr).join(":")
}

fn expanded_groups(addr: &Ipv6Addr) -> [String; 8] {
    addr.segments().map(|group| format!("{group:04x}"))
}

struct Parsed {
    addr: IpAddr,
    prefix: Option<u8>,
}

fn parse_token(raw: &str) -> Result<Parsed> {
    let token = raw.trim();
    if token.is_empty() {
        return Err(Error::malformed(raw, "empty address"));
    }

    let (addr_part, prefix) = match token.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (token, None),
    };

    let addr: IpAddr = addr_part
        .parse()
        .map_err(|_| Error::malformed(raw, "not an IP address"))?;

    let prefix = match prefix {
        None => None,
        Some(prefix) => {
            if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::malformed(raw, "prefix length must be decimal"));
            }
            let max = AddressFamily::of(&addr).max_prefix();
            match prefix.parse::<u8>() {
                Ok(len) if len <= max => Some(len),
                _ => {
                    return Err(Error::malformed(
                        raw,
                        format!("prefix length exceeds /{max}"),
                    ));
                }
            }
        }
    };

    Ok(Parsed { addr, prefix })
}

/// Classifies an explicit address or subnet without any aggregation.
///
/// IPv4 entries keep their dotted form; IPv6 entries are expanded to eight groups.
/// A prefix length is written back in plain decimal, so `/024` and `/24` name the
/// same entry.
///
/// # Errors
///
/// Returns [`Error::MalformedAddress`] when the token is not a valid address or
/// the prefix length is not a decimal within the family's range.
pub fn classify(raw: &str) -> Result<ClassifiedEntry> {
    let parsed = parse_token(raw)?;
    let family = AddressFamily::of(&parsed.addr);
    let addr = match parsed.addr {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => expand_ipv6(&v6),
    };
    let entry = match parsed.prefix {
        Some(len) => format!("{addr}/{len}"),
        None => addr,
    };
    Ok(ClassifiedEntry {
        family,
        entry: NormalizedEntry(entry),
    })
}

/// Classifies a peer-supplied address using the aggregation policy.
///
/// Bare IPv6 addresses become `<g0>:<g1>:<g2>:<g3>::/64`. Those whose first group is
/// `0000` (unspecified, IPv4-mapped, ...) yield `Ok(None)`. IPv4 addresses and
/// explicit IPv6 subnets are classified as in [`classify`].
///
/// # Errors
///
/// Returns [`Error::MalformedAddress`] for tokens that do not parse.
pub fn aggregate(raw: &str) -> Result<Option<ClassifiedEntry>> {
    let parsed = parse_token(raw)?;
    match (parsed.addr, parsed.prefix) {
        (IpAddr::V6(v6), None) => {
            let groups = expanded_groups(&v6);
            if groups[0] == "0000" {
                return Ok(None);
            }
            Ok(Some(ClassifiedEntry {
                family: AddressFamily::V6,
                entry: NormalizedEntry(format!(
                    "{}::/{IPV6_AGGREGATE_PREFIX}",
                    groups[..4].join(":")
                )),
            }))
        }
        _ => classify(raw).map(Some),
    }
}

/// Builds per-family candidate sets from a batch of peer tokens.
///
/// Blank tokens are ignored; malformed tokens are logged and skipped so one bad
/// entry never aborts the batch.
pub fn normalize_batch<S: AsRef<str>>(raw: &[S]) -> EntrySets {
    let mut sets = EntrySets::default();
    for token in raw {
        let token = token.as_ref();
        if token.trim().is_empty() {
            continue;
        }
        match aggregate(token) {
            Ok(Some(classified)) => {
                sets[classified.family].insert(classified.entry);
            }
            Ok(None) => debug!("Dropping non-aggregatable IPv6 address '{token}'"),
            Err(e) => debug!("Skipping {e}"),
        }
    }
    sets
}
