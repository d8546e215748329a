//! Candy Master Library
//!
//! Region assignment and cluster membership for the candy storage cluster:
//! the elected master splits the user-id key space across storage nodes as
//! they join, merges regions back as nodes go silent, and persists the region
//! table in the coordination store. The same master also hands out
//! cluster-unique ids.

pub mod allocator;
pub mod api;
pub mod cluster;
pub mod config;
pub mod coordination;
pub mod error;
pub mod master;
pub mod notifier;
pub mod observability;
pub mod version;

pub use allocator::IdAllocator;
pub use cluster::ClusterManager;
pub use config::MasterConfig;
pub use error::{ClusterError, Result};
pub use master::Master;
