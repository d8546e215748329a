//! Candy Core Library
//!
//! Region bookkeeping shared by the master and its clients: the region type,
//! the interval index used for point lookups, and the authoritative region
//! table with its split and merge rebalancing rules.

pub mod error;
pub mod index;
pub mod region;
pub mod table;

pub use error::{RegionError, Result};
pub use index::RegionIndex;
pub use region::{Region, DEFAULT_MODULUS};
pub use table::RegionTable;
