//! Region and Membership Endpoints
//!
//! - GET /regions - every region, or the whole key space unowned when not leader
//! - GET /regions/{host} - region of a storage node, assigning one if new
//! - GET /locate/{id} - region serving a user id
//! - POST /heartbeat - liveness report from a storage node
//! - GET /nodes - liveness registry
//! - POST /id - new cluster-unique id

use super::error::ApiError;
use super::AppState;
use crate::cluster::{ClusterManager, NodeStatus};
use crate::version;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use candy_core::Region;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub host: String,
}

#[derive(Debug, Serialize)]
pub struct IdResponse {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub git_sha: &'static str,
    pub full: String,
}

async fn leader_cluster(state: &AppState) -> Result<Arc<ClusterManager>, ApiError> {
    state.master.cluster().await.ok_or(ApiError::NotLeader)
}

/// GET /regions
#[tracing::instrument(skip(state))]
pub async fn list_regions(State(state): State<AppState>) -> Json<Vec<Region>> {
    Json(state.master.regions().await)
}

/// GET /regions/{host}
#[tracing::instrument(skip(state))]
pub async fn get_region(
    State(state): State<AppState>,
    Path(host): Path<String>,
) -> Result<Json<Region>, ApiError> {
    let cluster = leader_cluster(&state).await?;
    Ok(Json(cluster.get(&host).await?))
}

/// GET /locate/{id}
#[tracing::instrument(skip(state))]
pub async fn locate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Region>, ApiError> {
    let cluster = leader_cluster(&state).await?;
    Ok(Json(cluster.locate(id).await?))
}

/// POST /heartbeat
#[tracing::instrument(skip(state))]
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<StatusCode, ApiError> {
    let cluster = leader_cluster(&state).await?;
    cluster.on_health(&request.host).await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /nodes
#[tracing::instrument(skip(state))]
pub async fn list_nodes(State(state): State<AppState>) -> Result<Json<Vec<NodeStatus>>, ApiError> {
    let cluster = leader_cluster(&state).await?;
    Ok(Json(cluster.nodes().await))
}

/// POST /id
#[tracing::instrument(skip(state))]
pub async fn new_id(State(state): State<AppState>) -> Result<Json<IdResponse>, ApiError> {
    let allocator = state.master.allocator().await.ok_or(ApiError::NotLeader)?;
    Ok(Json(IdResponse {
        id: allocator.next_id().await,
    }))
}

/// GET /version
pub async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: version::VERSION,
        git_sha: version::GIT_SHA,
        full: version::full_version(),
    })
}
