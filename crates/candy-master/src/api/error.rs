//! API Error Mapping

use crate::coordination::CoordinationError;
use crate::error::ClusterError;
use crate::notifier::NotifierError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(Debug)]
pub enum ApiError {
    /// Cluster operations are only served by the elected master.
    NotLeader,
    Cluster(ClusterError),
}

impl From<ClusterError> for ApiError {
    fn from(err: ClusterError) -> Self {
        ApiError::Cluster(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotLeader => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Cluster(err) if err.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Cluster(ClusterError::Coordination(CoordinationError::CompareFailed { .. })) => {
                StatusCode::CONFLICT
            }
            ApiError::Cluster(ClusterError::Coordination(CoordinationError::Timeout(_)))
            | ApiError::Cluster(ClusterError::Notifier(NotifierError::Timeout { .. })) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ApiError::Cluster(ClusterError::Coordination(_) | ClusterError::Notifier(_)) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::Cluster(ClusterError::Region(_) | ClusterError::InvalidWatermark(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::NotLeader => "not the elected master".to_string(),
            ApiError::Cluster(err) => err.to_string(),
        };

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %message, "Request failed");
        }
        (status, message).into_response()
    }
}
