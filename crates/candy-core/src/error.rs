//! Region Errors

use thiserror::Error;

/// Errors raised by the region index and table.
///
/// `NotFound` is a control-flow signal rather than a fault: callers branch on
/// it to decide between bootstrapping and reporting a real failure.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("region not found")]
    NotFound,

    #[error("region of {host} spans {span} key(s) and cannot be split")]
    TooSmall { host: String, span: i32 },

    #[error("invalid region snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("region serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegionError::NotFound)
    }
}

pub type Result<T, E = RegionError> = std::result::Result<T, E>;
