//! Peer Notifier
//!
//! Outbound calls telling a storage node which key range it now serves. The
//! master notifies before changing its own table, so a node is never asked to
//! give up keys the table has not yet reassigned.

pub mod http;

pub use http::HttpNotifier;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("request to {host} failed: {source}")]
    Request {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{host} rejected region update with status {status}")]
    Rejected { host: String, status: u16 },

    #[error("notifying {host} timed out after {timeout:?}")]
    Timeout {
        host: String,
        timeout: std::time::Duration,
    },
}

pub type Result<T, E = NotifierError> = std::result::Result<T, E>;

/// Body of a region update sent to a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionUpdate {
    pub begin: i32,
    pub end: i32,
}

#[async_trait]
pub trait PeerNotifier: Send + Sync {
    /// Tell `host` its region is now `[begin, end)`.
    async fn region_set(&self, host: &str, begin: i32, end: i32) -> Result<()>;
}
