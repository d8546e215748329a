//! Health Check Endpoints
//!
//! Liveness and readiness probes.

use super::state::AppState;
use axum::{extract::State, http::StatusCode};

/// Liveness probe. Verifies the coordination store answers.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    let timeout = state.master.config().network_timeout;
    let check = tokio::time::timeout(timeout, state.master.coordination().ping()).await;

    match check {
        Ok(Ok(())) => Ok("OK"),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Coordination health check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(_) => {
            tracing::warn!("Coordination health check timed out");
            Err(StatusCode::REQUEST_TIMEOUT)
        }
    }
}

/// Readiness probe. Ready once this process leads a loaded cluster.
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.master.is_leader().await {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
