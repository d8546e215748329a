//! Cluster Errors

use crate::coordination::CoordinationError;
use crate::notifier::NotifierError;
use candy_core::RegionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    Region(#[from] RegionError),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error(transparent)]
    Notifier(#[from] NotifierError),

    #[error("persisted id watermark is not a number: {0:?}")]
    InvalidWatermark(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::Region(e) if e.is_not_found())
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterError::Region(RegionError::NotFound) => "not_found",
            ClusterError::Region(RegionError::TooSmall { .. }) => "too_small",
            ClusterError::Region(_) => "region",
            ClusterError::Coordination(CoordinationError::CompareFailed { .. }) => "compare_failed",
            ClusterError::Coordination(CoordinationError::Timeout(_)) => "coordination_timeout",
            ClusterError::Coordination(_) => "coordination",
            ClusterError::Notifier(NotifierError::Timeout { .. }) => "notifier_timeout",
            ClusterError::Notifier(_) => "notifier",
            ClusterError::InvalidWatermark(_) => "invalid_watermark",
        }
    }
}

pub type Result<T, E = ClusterError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_passthrough() {
        assert!(ClusterError::from(RegionError::NotFound).is_not_found());
        assert!(!ClusterError::from(CoordinationError::CompareFailed {
            key: "/master/addr".into()
        })
        .is_not_found());
    }

    #[test]
    fn test_kind_labels() {
        let err = ClusterError::from(RegionError::TooSmall {
            host: "a".into(),
            span: 1,
        });
        assert_eq!(err.kind(), "too_small");
        assert_eq!(
            ClusterError::from(CoordinationError::Timeout(std::time::Duration::from_secs(3))).kind(),
            "coordination_timeout"
        );
        assert_eq!(ClusterError::InvalidWatermark("x".into()).kind(), "invalid_watermark");
    }
}
