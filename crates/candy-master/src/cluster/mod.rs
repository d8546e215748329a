//! Cluster Membership
//!
//! - `manager`: region table ownership, arrivals, expiries, liveness sweep
//! - `liveness`: last-heartbeat bookkeeping per storage node

pub mod liveness;
pub mod manager;

pub use liveness::{LivenessRecord, LivenessRegistry, NodeStatus};
pub use manager::ClusterManager;
