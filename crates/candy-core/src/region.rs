//! Region Type
//!
//! A region is one half-open slice `[begin, end)` of the user-id key space and
//! the storage node that serves it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default key-space modulus. Prime, so ids spread evenly over the ring.
pub const DEFAULT_MODULUS: i32 = 9973;

/// A contiguous half-open range of the key space owned by one host.
///
/// Field names are capitalised on the wire to stay compatible with snapshots
/// already persisted in the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    #[serde(rename = "Begin")]
    pub begin: i32,
    #[serde(rename = "End")]
    pub end: i32,
    #[serde(rename = "Host")]
    pub host: String,
}

impl Region {
    pub fn new(host: impl Into<String>, begin: i32, end: i32) -> Self {
        Self {
            begin,
            end,
            host: host.into(),
        }
    }

    /// Number of keys covered by this region.
    pub fn span(&self) -> i32 {
        self.end - self.begin
    }

    /// Whether `key` (reduced into `[0, modulus)`) falls inside this region.
    pub fn matches(&self, key: i64, modulus: i32) -> bool {
        let slot = key.rem_euclid(i64::from(modulus)) as i32;
        self.contains(slot)
    }

    /// Whether an already reduced slot falls inside this region.
    pub fn contains(&self, slot: i32) -> bool {
        self.begin <= slot && slot < self.end
    }

    /// Bounds covering both regions: smallest begin, largest end.
    ///
    /// Used to compute the range a neighbour adopts when this region is merged
    /// into it. Adjacency is not checked.
    pub fn union_bounds(&self, other: &Region) -> (i32, i32) {
        (self.begin.min(other.begin), self.end.max(other.end))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}, {})", self.host, self.begin, self.end)
    }
}
