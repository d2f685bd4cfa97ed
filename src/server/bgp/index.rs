//! An index of observed BGP announcements.
//!
//! The index answers the question which announcements are the most
//! specific ones for a set of resources: all announcements for the
//! resources themselves or more specific prefixes, plus, for any part of
//! the resources not covered by those, the announcements of the nearest
//! less specific prefix.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use arc_swap::ArcSwapOption;
use log::{debug, info};
use rpki::repository::resources::{Addr, AddressFamily, AddressRange, Prefix};
use crate::api::bgp::BgpRisEntry;
use crate::api::resources::{ResourceSet, TypedPrefix};
use crate::config::BgpConfig;


//------------ AnnouncementIndex ---------------------------------------------

/// The index of announcements.
///
/// The index holds an immutable snapshot of the data that is replaced as a
/// whole by [`reset_entries`][Self::reset_entries]. Queries never block,
/// they keep using the snapshot that was current when they started.
#[derive(Debug)]
pub struct AnnouncementIndex {
    config: BgpConfig,

    /// The current data set.
    ///
    /// This is `None` until the first data set is loaded.
    snapshot: ArcSwapOption<IndexSnapshot>,
}

impl Default for AnnouncementIndex {
    fn default() -> Self {
        Self::new(BgpConfig::default())
    }
}

impl AnnouncementIndex {
    pub fn new(config: BgpConfig) -> Self {
        AnnouncementIndex {
            config,
            snapshot: ArcSwapOption::new(None),
        }
    }

    /// Replaces all data with the given entries.
    ///
    /// Entries below the visibility threshold and entries for prefixes
    /// less specific than the configured floor are dropped.
    pub fn reset_entries(&self, entries: impl IntoIterator<Item = BgpRisEntry>) {
        let snapshot = IndexSnapshot::build(&self.config, entries);
        info!("Loaded {} BGP announcements into the index", snapshot.len);
        self.snapshot.store(Some(Arc::new(snapshot)));
    }

    /// Returns whether no data has been loaded or no entry was retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of entries retained in the index.
    pub fn len(&self) -> usize {
        self.snapshot.load().as_ref().map(|snapshot| {
            snapshot.len
        }).unwrap_or(0)
    }

    /// Returns the most specific announcements overlapping the resources.
    ///
    /// AS numbers in the resources are ignored.
    pub fn find_most_specific_overlapping(
        &self, resources: &ResourceSet
    ) -> HashSet<BgpRisEntry> {
        let matched = self.find_most_specific_contained_and_not_contained(
            resources
        );
        let mut res = matched.contained;
        res.extend(matched.not_contained);
        res
    }

    /// Returns the most specific announcements overlapping the resources.
    ///
    /// Announcements for prefixes covered by the resources are returned as
    /// contained, announcements for less specific prefixes as not
    /// contained.
    pub fn find_most_specific_contained_and_not_contained(
        &self, resources: &ResourceSet
    ) -> MatchedEntries {
        let mut res = MatchedEntries::default();
        let snapshot = self.snapshot.load();
        let Some(snapshot) = snapshot.as_ref() else {
            return res
        };
        for prefix in resources.ipv4_prefixes() {
            snapshot.v4.find_matches(prefix.into(), &mut res);
        }
        for prefix in resources.ipv6_prefixes() {
            snapshot.v6.find_matches(prefix.into(), &mut res);
        }
        res
    }
}


//------------ MatchedEntries ------------------------------------------------

/// The result of a query split into contained and less specific entries.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MatchedEntries {
    /// Entries for the queried prefixes or more specifics.
    pub contained: HashSet<BgpRisEntry>,

    /// Entries for less specific prefixes.
    pub not_contained: HashSet<BgpRisEntry>,
}


//------------ IndexSnapshot -------------------------------------------------

#[derive(Debug)]
struct IndexSnapshot {
    v4: FamilyIndex,
    v6: FamilyIndex,
    len: usize,
}

impl IndexSnapshot {
    fn build(
        config: &BgpConfig,
        entries: impl IntoIterator<Item = BgpRisEntry>,
    ) -> Self {
        let mut v4 = HashMap::new();
        let mut v6 = HashMap::new();
        let (mut len, mut skipped) = (0, 0);

        for entry in entries {
            if entry.visibility < config.visibility_threshold {
                skipped += 1;
                continue
            }
            let (group, floor) = match entry.prefix {
                TypedPrefix::V4(_) => (&mut v4, config.ipv4_prefix_len_floor),
                TypedPrefix::V6(_) => (&mut v6, config.ipv6_prefix_len_floor),
            };
            let prefix = entry.prefix.prefix();
            if prefix.addr_len() < floor {
                skipped += 1;
                continue
            }
            let key = (prefix.min().to_bits(), prefix.addr_len());
            let list: &mut Vec<BgpRisEntry> = group.entry(key).or_default();
            if !list.contains(&entry) {
                list.push(entry);
                len += 1;
            }
        }
        debug!("Skipped {} BGP announcements while building index", skipped);

        IndexSnapshot {
            v4: FamilyIndex::new(AddressFamily::Ipv4, v4),
            v6: FamilyIndex::new(AddressFamily::Ipv6, v6),
            len,
        }
    }
}


//------------ FamilyIndex ---------------------------------------------------

/// The announcements for one address family.
///
/// Addresses are kept as the raw bits of [`Addr`], so IPv4 addresses live
/// in the upper 32 bits and prefix lengths count from the top for both
/// families.
#[derive(Debug)]
struct FamilyIndex {
    family: AddressFamily,

    /// The prefixes ordered by first address and then prefix length.
    prefixes: Vec<IndexedPrefix>,
}

#[derive(Debug)]
struct IndexedPrefix {
    start: u128,
    last: u128,
    len: u8,
    entries: Vec<BgpRisEntry>,
}

impl FamilyIndex {
    fn new(
        family: AddressFamily, grouped: HashMap<(u128, u8), Vec<BgpRisEntry>>
    ) -> Self {
        let mut prefixes: Vec<_> = grouped.into_iter().map(
            |((start, len), entries)| {
                IndexedPrefix {
                    start,
                    last: start | host_mask(len),
                    len,
                    entries,
                }
            }
        ).collect();
        prefixes.sort_by_key(|prefix| (prefix.start, prefix.len));
        FamilyIndex { family, prefixes }
    }

    fn find(&self, start: u128, len: u8) -> Option<&IndexedPrefix> {
        self.prefixes.binary_search_by_key(&(start, len), |prefix| {
            (prefix.start, prefix.len)
        }).ok().map(|idx| &self.prefixes[idx])
    }

    /// Returns the prefix itself and all more specifics.
    fn more_specifics(
        &self, start: u128, last: u128, len: u8
    ) -> impl Iterator<Item = &IndexedPrefix> {
        let from = self.prefixes.partition_point(|prefix| prefix.start < start);
        let to = self.prefixes.partition_point(|prefix| prefix.start <= last);
        self.prefixes[from..to].iter().filter(move |prefix| prefix.len >= len)
    }

    /// Returns the nearest strictly less specific prefix.
    fn less_specific(&self, prefix: Prefix) -> Option<&IndexedPrefix> {
        (0..prefix.addr_len()).rev().find_map(|len| {
            self.find(prefix.min().to_min(len).to_bits(), len)
        })
    }

    fn find_matches(&self, prefix: Prefix, res: &mut MatchedEntries) {
        let (start, last) = prefix.range();
        let (start, last) = (start.to_bits(), last.to_bits());

        // The first address not yet covered by a more specific, or `None`
        // once the end of the address space was covered.
        let mut uncovered = Some(start);
        for more_specific in self.more_specifics(
            start, last, prefix.addr_len()
        ) {
            res.contained.extend(more_specific.entries.iter().copied());
            if let Some(next) = uncovered {
                if more_specific.start > next {
                    self.add_less_specifics(next, more_specific.start - 1, res);
                }
                if more_specific.last >= next {
                    uncovered = more_specific.last.checked_add(1);
                }
            }
        }
        if let Some(next) = uncovered {
            if next <= last {
                self.add_less_specifics(next, last, res);
            }
        }
    }

    fn add_less_specifics(&self, min: u128, max: u128, res: &mut MatchedEntries) {
        let range = AddressRange::new(Addr::from_bits(min), Addr::from_bits(max));
        let prefixes: Vec<Prefix> = match self.family {
            AddressFamily::Ipv4 => range.to_v4_prefixes().collect(),
            AddressFamily::Ipv6 => range.to_v6_prefixes().collect(),
        };
        for prefix in prefixes {
            if let Some(less_specific) = self.less_specific(prefix) {
                res.not_contained.extend(less_specific.entries.iter().copied());
            }
        }
    }
}

/// Returns the bits of an address not covered by a prefix of length `len`.
fn host_mask(len: u8) -> u128 {
    u128::MAX.checked_shr(u32::from(len)).unwrap_or(0)
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use rpki::repository::resources::Asn;
    use super::*;

    fn entry(asn: u32, prefix: &str, visibility: u32) -> BgpRisEntry {
        BgpRisEntry::new(
            Asn::from_u32(asn),
            TypedPrefix::from_str(prefix).unwrap(),
            visibility,
        )
    }

    fn resources(s: &str) -> ResourceSet {
        ResourceSet::from_str(s).unwrap()
    }

    fn set(entries: &[BgpRisEntry]) -> HashSet<BgpRisEntry> {
        entries.iter().copied().collect()
    }

    fn ipv6_large() -> BgpRisEntry { entry(65000, "ff00::/11", 20) }
    fn ipv4_large() -> BgpRisEntry { entry(65000, "6.0.0.0/7", 20) }
    fn below_threshold() -> BgpRisEntry { entry(65000, "10.0.0.0/8", 1) }
    fn e128_1() -> BgpRisEntry { entry(3333, "128.0.0.0/1", 5) }
    fn e193_8() -> BgpRisEntry { entry(3333, "193.0.0.0/8", 5) }
    fn ffce_16() -> BgpRisEntry { entry(3333, "ffce::/16", 6) }
    fn e193_16() -> BgpRisEntry { entry(65535, "193.16.0.0/16", 5) }

    fn default_index() -> AnnouncementIndex {
        let index = AnnouncementIndex::default();
        index.reset_entries(vec![
            below_threshold(), e193_8(), ffce_16(), ipv6_large(), ipv4_large()
        ]);
        index
    }

    fn nested_index() -> AnnouncementIndex {
        let index = AnnouncementIndex::default();
        index.reset_entries(vec![e193_16(), e193_8(), e128_1()]);
        index
    }

    #[test]
    fn empty_until_loaded() {
        let index = AnnouncementIndex::default();
        assert!(index.is_empty());
        assert!(
            index.find_most_specific_overlapping(
                &resources("0.0.0.0/0")
            ).is_empty()
        );

        assert_eq!(default_index().len(), 2);
    }

    #[test]
    fn find_overlapping() {
        let index = default_index();
        assert_eq!(
            index.find_most_specific_overlapping(&resources("0.0.0.0/0")),
            set(&[e193_8()])
        );
        assert_eq!(
            index.find_most_specific_overlapping(
                &resources("192.0.0.0-193.0.0.1")
            ),
            set(&[e193_8()])
        );
        assert_eq!(
            index.find_most_specific_overlapping(&resources("ffce:abcd::/32")),
            set(&[ffce_16()])
        );
        assert_eq!(
            index.find_most_specific_overlapping(
                &resources("0.0.0.0/0, ffce:abcd::/32")
            ),
            set(&[e193_8(), ffce_16()])
        );
    }

    #[test]
    fn skip_below_threshold() {
        let index = default_index();
        assert!(
            index.find_most_specific_overlapping(
                &resources("10.0.0.0/8")
            ).is_empty()
        );

        let index = AnnouncementIndex::default();
        index.reset_entries(vec![
            entry(65000, "10.0.0.0/8", 4), entry(65001, "10.0.0.0/8", 5)
        ]);
        assert_eq!(
            index.find_most_specific_overlapping(&resources("10.0.0.0/8")),
            set(&[entry(65001, "10.0.0.0/8", 5)])
        );
    }

    #[test]
    fn skip_large_prefixes() {
        let index = default_index();
        assert!(
            index.find_most_specific_overlapping(
                &resources("6.0.0.0/8")
            ).is_empty()
        );
        assert!(
            index.find_most_specific_overlapping(
                &resources("ff00::/12")
            ).is_empty()
        );
    }

    #[test]
    fn skip_non_overlapping() {
        let index = default_index();
        assert!(
            index.find_most_specific_overlapping(
                &resources("9.0.0.0/8")
            ).is_empty()
        );
    }

    #[test]
    fn ignore_origin_asn() {
        let index = default_index();
        assert!(
            index.find_most_specific_overlapping(
                &resources("AS3333")
            ).is_empty()
        );
    }

    #[test]
    fn less_specific_only_for_uncovered() {
        let index = nested_index();
        assert_eq!(
            index.find_most_specific_overlapping(&resources("193.16.0.0/17")),
            set(&[e193_16()])
        );
        assert_eq!(
            index.find_most_specific_overlapping(&resources("193.16.0.0/15")),
            set(&[e193_8(), e193_16()])
        );
        assert_eq!(
            index.find_most_specific_overlapping(&resources("193.0.0.0/8")),
            set(&[e193_8(), e193_16()])
        );
    }

    #[test]
    fn split_contained() {
        let index = AnnouncementIndex::default();
        index.reset_entries(vec![e193_16(), e193_8()]);
        let matched = index.find_most_specific_contained_and_not_contained(
            &resources("193.16.0.0/15")
        );
        assert_eq!(matched.contained, set(&[e193_16()]));
        assert_eq!(matched.not_contained, set(&[e193_8()]));
    }

    #[test]
    fn covered_range_excludes_less_specific() {
        let specifics = [
            entry(43142, "91.194.96.0/22", 20),
            entry(43142, "91.194.98.0/24", 20),
            entry(43142, "91.194.100.0/24", 20),
            entry(43142, "91.194.101.0/24", 20),
        ];
        let index = AnnouncementIndex::default();
        index.reset_entries(
            specifics.iter().copied().chain(
                Some(entry(9155, "91.0.0.0/8", 20))
            )
        );
        assert_eq!(
            index.find_most_specific_overlapping(
                &resources("91.194.96.0-91.194.101.255")
            ),
            set(&specifics)
        );
    }

    #[test]
    fn multiple_asns_for_same_prefix() {
        let index = AnnouncementIndex::default();
        index.reset_entries(vec![
            entry(207021, "176.97.158.0/24", 83),
            entry(1921, "176.97.158.0/24", 207),
            entry(207021, "2001:67c:10b8::/48", 232),
            entry(1921, "2001:67c:10b8::/48", 46),
        ]);
        let matched = index.find_most_specific_contained_and_not_contained(
            &resources("176.97.158.0/24, 2001:67c:10b8::/48")
        );
        assert_eq!(matched.contained.len(), 4);
        assert!(matched.not_contained.is_empty());
    }

    #[test]
    fn duplicates_are_merged() {
        let index = AnnouncementIndex::default();
        index.reset_entries(vec![e193_8(), e193_8(), e193_16()]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn reset_is_idempotent() {
        let entries = vec![e193_16(), e193_8(), e128_1()];
        let queries = [
            "193.16.0.0/17", "193.16.0.0/15", "193.0.0.0/8", "0.0.0.0/0"
        ];

        let once = AnnouncementIndex::default();
        once.reset_entries(entries.clone());
        let twice = AnnouncementIndex::default();
        twice.reset_entries(entries.clone());
        twice.reset_entries(entries);

        assert_eq!(once.len(), twice.len());
        for query in queries {
            let query = resources(query);
            assert_eq!(
                once.find_most_specific_contained_and_not_contained(&query),
                twice.find_most_specific_contained_and_not_contained(&query)
            );
        }
    }

    #[test]
    fn configured_filters() {
        let index = AnnouncementIndex::new(BgpConfig {
            visibility_threshold: 1,
            ipv4_prefix_len_floor: 7,
            ipv6_prefix_len_floor: 11,
        });
        index.reset_entries(vec![below_threshold(), ipv4_large(), ipv6_large()]);
        assert_eq!(index.len(), 3);
        assert_eq!(
            index.find_most_specific_overlapping(&resources("6.0.0.0/8")),
            set(&[ipv4_large()])
        );
    }
}
