//! Region Interval Index
//!
//! Ordered index over regions keyed by their begin. Point lookups follow the
//! interval rule: a stored region answers a probe when the probe equals its
//! begin or falls inside `[begin, end)`. Regions never overlap while the table
//! is consistent, so the greatest begin at or below the probe is the only
//! candidate.

use crate::region::Region;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct RegionIndex {
    regions: BTreeMap<i32, Region>,
}

impl RegionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a region, replacing any region that starts at the same begin.
    pub fn insert(&mut self, region: Region) -> Option<Region> {
        self.regions.insert(region.begin, region)
    }

    /// Remove the region starting at `begin`.
    pub fn remove(&mut self, begin: i32) -> Option<Region> {
        self.regions.remove(&begin)
    }

    /// Find the region containing `probe`.
    pub fn get(&self, probe: i32) -> Option<&Region> {
        self.regions
            .range(..=probe)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.begin == probe || region.contains(probe))
    }

    /// All regions in ascending begin order.
    pub fn dump(&self) -> Vec<Region> {
        self.regions.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Region the next split should be carved from.
    ///
    /// Walks in begin order starting from the first region and hands the
    /// candidacy to any region whose span is more than half of the current
    /// candidate's. The last hand-over wins, so this is order dependent and not
    /// a strict arg-max: `[0, 4987)` followed by `[4987, 9973)` picks the
    /// second even though it is one key shorter.
    pub fn max(&self) -> Option<&Region> {
        let mut regions = self.regions.values();
        let mut best = regions.next()?;

        for region in regions {
            if i64::from(region.span()) * 2 > i64::from(best.span()) {
                best = region;
            }
        }

        Some(best)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }
}
