//! Region Table
//!
//! Authoritative in-memory map of which host serves which region. Keeps the
//! interval index and the host map in step for every split and merge, and
//! converts to and from the JSON snapshot persisted in the coordination store.

use crate::error::{RegionError, Result};
use crate::index::RegionIndex;
use crate::region::{Region, DEFAULT_MODULUS};
use std::collections::BTreeMap;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct RegionTable {
    modulus: i32,
    index: RegionIndex,
    hosts: BTreeMap<String, Region>,
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::new(DEFAULT_MODULUS)
    }
}

impl RegionTable {
    pub fn new(modulus: i32) -> Self {
        Self {
            modulus,
            index: RegionIndex::new(),
            hosts: BTreeMap::new(),
        }
    }

    /// Rebuild a table from a persisted snapshot.
    ///
    /// An empty or blank snapshot is an empty cluster.
    pub fn from_snapshot(snapshot: &[u8], modulus: i32) -> Result<Self> {
        let mut table = Self::new(modulus);
        if snapshot.iter().all(u8::is_ascii_whitespace) {
            return Ok(table);
        }

        let hosts: BTreeMap<String, Region> = serde_json::from_slice(snapshot)?;
        for (host, region) in hosts {
            if host != region.host {
                return Err(RegionError::InvalidSnapshot(format!(
                    "entry {host} holds region of {}",
                    region.host
                )));
            }
            if region.begin < 0 || region.end > modulus || region.begin >= region.end {
                return Err(RegionError::InvalidSnapshot(format!(
                    "region {region} is outside [0, {modulus})"
                )));
            }
            if table.index.get(region.begin).is_some() {
                return Err(RegionError::InvalidSnapshot(format!(
                    "region {region} overlaps an existing region"
                )));
            }
            table.index.insert(region.clone());
            table.hosts.insert(host, region);
        }

        let regions = table.index.dump();
        if regions.windows(2).any(|pair| pair[0].end > pair[1].begin) {
            return Err(RegionError::InvalidSnapshot(
                "snapshot contains overlapping regions".to_string(),
            ));
        }

        debug!(regions = table.len(), modulus, "Region table loaded from snapshot");
        Ok(table)
    }

    pub fn modulus(&self) -> i32 {
        self.modulus
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn contains_host(&self, host: &str) -> bool {
        self.hosts.contains_key(host)
    }

    pub fn get_by_host(&self, host: &str) -> Result<Region> {
        self.hosts.get(host).cloned().ok_or(RegionError::NotFound)
    }

    /// Region serving `key` once reduced modulo the key space.
    pub fn locate(&self, key: i64) -> Result<Region> {
        let slot = key.rem_euclid(i64::from(self.modulus)) as i32;
        self.index.get(slot).cloned().ok_or(RegionError::NotFound)
    }

    /// Region the next arriving host should split.
    pub fn max(&self) -> Result<Region> {
        self.index.max().cloned().ok_or(RegionError::NotFound)
    }

    /// All regions ordered by begin.
    pub fn dump(&self) -> Vec<Region> {
        self.index.dump()
    }

    /// Give `to` the upper half of `from`'s region.
    ///
    /// On an empty table `to` receives the whole key space and `from` is
    /// ignored. If `to` already owns a region that region is returned as is,
    /// which keeps retries safe.
    pub fn split(&mut self, from: &str, to: &str) -> Result<Region> {
        if self.is_empty() {
            let region = Region::new(to, 0, self.modulus);
            self.index.insert(region.clone());
            self.hosts.insert(to.to_string(), region.clone());
            debug!(host = %to, end = self.modulus, "Bootstrapped region table");
            return Ok(region);
        }

        if let Some(existing) = self.hosts.get(to) {
            trace!(host = %to, region = %existing, "Host already owns a region");
            return Ok(existing.clone());
        }

        let source = self.hosts.get(from).cloned().ok_or(RegionError::NotFound)?;
        if source.span() < 2 {
            return Err(RegionError::TooSmall {
                span: source.span(),
                host: source.host,
            });
        }

        let delta = source.span() / 2;
        let shrunk = Region::new(from, source.begin, source.end - delta);
        let carved = Region::new(to, source.end - delta, source.end);

        self.index.remove(source.begin);
        self.index.insert(shrunk.clone());
        self.index.insert(carved.clone());
        self.hosts.insert(from.to_string(), shrunk.clone());
        self.hosts.insert(to.to_string(), carved.clone());

        debug!(from = %shrunk, to = %carved, "Split region");
        Ok(carved)
    }

    /// Fold `from`'s region into `to` and forget `from`.
    pub fn merge(&mut self, from: &str, to: &str) -> Result<()> {
        let source = self.hosts.get(from).cloned().ok_or(RegionError::NotFound)?;
        let target = self.hosts.get(to).cloned().ok_or(RegionError::NotFound)?;

        let (begin, end) = source.union_bounds(&target);
        let merged = Region::new(to, begin, end);

        self.index.remove(source.begin);
        self.index.remove(target.begin);
        self.index.insert(merged.clone());
        self.hosts.remove(from);
        self.hosts.insert(to.to_string(), merged.clone());

        debug!(from = %source, into = %merged, "Merged region");
        Ok(())
    }

    /// The region of `host` and the neighbour that absorbs it on expiry.
    ///
    /// The neighbour is the successor, except for the region touching the end
    /// of the key space which falls back to its predecessor.
    pub fn next(&self, host: &str) -> Result<(Region, Region)> {
        let current = self.hosts.get(host).ok_or(RegionError::NotFound)?;

        let probe = if current.end == self.modulus {
            current.begin - 1
        } else {
            current.end
        };

        let neighbour = self.index.get(probe).ok_or(RegionError::NotFound)?;
        if neighbour.host == current.host {
            return Err(RegionError::NotFound);
        }

        Ok((current.clone(), neighbour.clone()))
    }

    /// Serialize the host map to the persisted snapshot format.
    pub fn marshal(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.hosts)?)
    }

    /// Check that the regions tile `[0, modulus)` with no gap or overlap.
    pub fn verify_tiling(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let mut cursor = 0;
        for region in self.index.iter() {
            if region.begin != cursor {
                return Err(RegionError::InvalidSnapshot(format!(
                    "expected region starting at {cursor}, found {region}"
                )));
            }
            cursor = region.end;
        }

        if cursor != self.modulus {
            return Err(RegionError::InvalidSnapshot(format!(
                "regions end at {cursor}, key space ends at {}",
                self.modulus
            )));
        }

        if self.index.len() != self.hosts.len() {
            return Err(RegionError::InvalidSnapshot(
                "index and host map disagree".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOSTS: [&str; 4] = [
        "127.0.0.1:1111",
        "127.0.0.1:2222",
        "127.0.0.1:3333",
        "127.0.0.1:4444",
    ];

    const FOUR_NODE_SNAPSHOT: &str = r#"{"127.0.0.1:1111":{"Begin":0,"End":2494,"Host":"127.0.0.1:1111"},"127.0.0.1:2222":{"Begin":4987,"End":7480,"Host":"127.0.0.1:2222"},"127.0.0.1:3333":{"Begin":7480,"End":9973,"Host":"127.0.0.1:3333"},"127.0.0.1:4444":{"Begin":2494,"End":4987,"Host":"127.0.0.1:4444"}}"#;

    /// Add hosts one at a time, each splitting the current max region.
    fn grow(hosts: &[&str]) -> RegionTable {
        let mut table = RegionTable::default();
        for host in hosts {
            match table.max() {
                Ok(max) => table.split(&max.host, host).unwrap(),
                Err(RegionError::NotFound) => table.split("", host).unwrap(),
                Err(e) => panic!("unexpected error: {e}"),
            };
        }
        table
    }

    #[test]
    fn test_bootstrap() {
        let mut table = RegionTable::default();
        let region = table.split("", "A").unwrap();

        assert_eq!(region, Region::new("A", 0, 9973));
        assert_eq!(table.len(), 1);
        table.verify_tiling().unwrap();
    }

    #[test]
    fn test_split_halves() {
        let mut table = RegionTable::default();
        table.split("", "A").unwrap();
        let b = table.split("A", "B").unwrap();

        assert_eq!(b, Region::new("B", 4987, 9973));
        assert_eq!(table.get_by_host("A").unwrap(), Region::new("A", 0, 4987));
        table.verify_tiling().unwrap();
    }

    #[test]
    fn test_split_is_idempotent() {
        let mut table = RegionTable::default();
        table.split("", "A").unwrap();

        let first = table.split("A", "B").unwrap();
        let second = table.split("A", "B").unwrap();

        assert_eq!(first, second);
        assert_eq!(table.get_by_host("A").unwrap(), Region::new("A", 0, 4987));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_split_unknown_source() {
        let mut table = RegionTable::default();
        table.split("", "A").unwrap();

        assert!(table.split("missing", "B").unwrap_err().is_not_found());
        assert!(!table.contains_host("B"));
    }

    #[test]
    fn test_split_too_small() {
        let mut table = RegionTable::new(2);
        table.split("", "A").unwrap();
        table.split("A", "B").unwrap();

        let err = table.split("A", "C").unwrap_err();
        assert!(matches!(err, RegionError::TooSmall { ref host, span: 1 } if host == "A"));
        table.verify_tiling().unwrap();
    }

    #[test]
    fn test_merge_reverses_split() {
        let mut table = RegionTable::default();
        table.split("", "A").unwrap();
        table.split("A", "B").unwrap();

        table.merge("B", "A").unwrap();

        assert_eq!(table.dump(), vec![Region::new("A", 0, 9973)]);
        assert!(table.get_by_host("B").unwrap_err().is_not_found());
        table.verify_tiling().unwrap();
    }

    #[test]
    fn test_merge_requires_both_hosts() {
        let mut table = grow(&HOSTS[..2]);

        assert!(table.merge("nobody", HOSTS[0]).unwrap_err().is_not_found());
        assert!(table.merge(HOSTS[0], "nobody").unwrap_err().is_not_found());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_four_node_fixture() {
        let table = grow(&HOSTS);

        assert_eq!(table.get_by_host(HOSTS[0]).unwrap(), Region::new(HOSTS[0], 0, 2494));
        assert_eq!(table.get_by_host(HOSTS[3]).unwrap(), Region::new(HOSTS[3], 2494, 4987));
        assert_eq!(table.get_by_host(HOSTS[1]).unwrap(), Region::new(HOSTS[1], 4987, 7480));
        assert_eq!(table.get_by_host(HOSTS[2]).unwrap(), Region::new(HOSTS[2], 7480, 9973));
        table.verify_tiling().unwrap();
    }

    #[test]
    fn test_locate_matches_fixture() {
        let table = grow(&HOSTS);

        let expected = [
            (0, HOSTS[0]),
            (2493, HOSTS[0]),
            (2494, HOSTS[3]),
            (4986, HOSTS[3]),
            (4987, HOSTS[1]),
            (7479, HOSTS[1]),
            (7489, HOSTS[2]),
            (9972, HOSTS[2]),
        ];

        for (id, host) in expected {
            assert_eq!(table.locate(id).unwrap().host, host, "id {id}");
        }
    }

    #[test]
    fn test_locate_is_unique_for_every_key() {
        let table = grow(&HOSTS);
        let regions = table.dump();

        for key in 0..i64::from(table.modulus()) {
            let found = table.locate(key).unwrap();
            let matching: Vec<_> = regions
                .iter()
                .filter(|r| r.matches(key, table.modulus()))
                .collect();

            assert_eq!(matching.len(), 1, "key {key}");
            assert_eq!(matching[0], &found);
        }
    }

    #[test]
    fn test_max_sequence() {
        let mut table = RegionTable::default();
        assert!(table.max().unwrap_err().is_not_found());

        table.split("", HOSTS[0]).unwrap();
        let max = table.max().unwrap();
        assert_eq!(max.host, HOSTS[0]);

        table.split(&max.host, HOSTS[1]).unwrap();
        let max = table.max().unwrap();
        assert_eq!(max.host, HOSTS[1]);

        table.split(&max.host, HOSTS[2]).unwrap();
        assert_eq!(table.max().unwrap().host, HOSTS[0]);
    }

    #[test]
    fn test_next_successor_and_predecessor() {
        let table = grow(&HOSTS);

        let (current, next) = table.next(HOSTS[0]).unwrap();
        assert_eq!(current.host, HOSTS[0]);
        assert_eq!(next.host, HOSTS[3]);

        // last region wraps back to its predecessor
        let (current, next) = table.next(HOSTS[2]).unwrap();
        assert_eq!(current.host, HOSTS[2]);
        assert_eq!(next.host, HOSTS[1]);
    }

    #[test]
    fn test_next_single_or_unknown() {
        let table = grow(&HOSTS[..1]);

        assert!(table.next(HOSTS[0]).unwrap_err().is_not_found());
        assert!(table.next("nobody").unwrap_err().is_not_found());
    }

    #[test]
    fn test_expire_every_host_keeps_tiling() {
        let mut table = grow(&HOSTS);

        for host in &HOSTS[..3] {
            let (_, next) = table.next(host).unwrap();
            table.merge(host, &next.host).unwrap();
            table.verify_tiling().unwrap();
        }

        assert_eq!(table.dump(), vec![Region::new(HOSTS[3], 0, 9973)]);
    }

    #[test]
    fn test_marshal_matches_reference_encoding() {
        let table = grow(&HOSTS);
        assert_eq!(table.marshal().unwrap(), FOUR_NODE_SNAPSHOT);
    }

    #[test]
    fn test_from_snapshot_rebuilds_index() {
        let table = RegionTable::from_snapshot(FOUR_NODE_SNAPSHOT.as_bytes(), DEFAULT_MODULUS).unwrap();

        for host in HOSTS {
            assert!(table.get_by_host(host).is_ok(), "missing {host}");
        }
        assert_eq!(table.locate(3000).unwrap().host, HOSTS[3]);
        table.verify_tiling().unwrap();
    }

    #[test]
    fn test_from_snapshot_empty() {
        assert!(RegionTable::from_snapshot(b"", DEFAULT_MODULUS).unwrap().is_empty());
        assert!(RegionTable::from_snapshot(b"{}", DEFAULT_MODULUS).unwrap().is_empty());
    }

    #[test]
    fn test_from_snapshot_rejects_overlap() {
        let snapshot = r#"{"a":{"Begin":0,"End":6000,"Host":"a"},"b":{"Begin":5000,"End":9973,"Host":"b"}}"#;
        let err = RegionTable::from_snapshot(snapshot.as_bytes(), DEFAULT_MODULUS).unwrap_err();
        assert!(matches!(err, RegionError::InvalidSnapshot(_)));
    }

    #[test]
    fn test_from_snapshot_rejects_garbage() {
        let err = RegionTable::from_snapshot(b"not json", DEFAULT_MODULUS).unwrap_err();
        assert!(matches!(err, RegionError::Serialization(_)));
    }
}
