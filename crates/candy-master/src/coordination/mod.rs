//! Coordination Store
//!
//! The master keeps two keys in the coordination store:
//! - `/master/addr`: address of the elected master, used as the compare key
//!   guarding every write of the region snapshot
//! - `/master/region`: JSON snapshot of the region table
//! - `/master/id`: highest second handed out by the id allocator
//!
//! Backends:
//! - `etcd`: production backend with leader election
//! - `memory`: in-process backend for standalone mode and tests

pub mod etcd;
pub mod memory;

pub use etcd::EtcdCoordination;
pub use memory::MemoryCoordination;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Key holding the address of the elected master.
pub const MASTER_ADDR_KEY: &str = "/master/addr";

/// Key holding the persisted region snapshot.
pub const REGION_KEY: &str = "/master/region";

/// Key holding the id allocator's watermark, in unix seconds.
pub const ID_KEY: &str = "/master/id";

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("compare failed on {key}")]
    CompareFailed { key: String },

    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("coordination call timed out after {0:?}")]
    Timeout(Duration),

    #[error("coordination store closed: {0}")]
    Closed(String),
}

pub type Result<T, E = CoordinationError> = std::result::Result<T, E>;

/// Run a store call under `timeout`, mapping expiry to `Timeout`.
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(CoordinationError::Timeout(timeout)))
}

/// Event kinds a caller can wait for on a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Put,
    Delete,
}

/// Minimal key-value contract the master needs from its coordination store.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Current value at `key`, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` at `key` only if `cmp_key` currently holds `cmp_value`.
    ///
    /// An empty `cmp_value` requires `cmp_key` to be absent.
    async fn compare_and_swap(
        &self,
        cmp_key: &str,
        cmp_value: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;

    /// Resolve once an event of `kind` happens on `key`.
    async fn watch(&self, key: &str, kind: WatchKind) -> Result<()>;

    /// Cheap round trip used by the liveness probe.
    async fn ping(&self) -> Result<()>;
}
