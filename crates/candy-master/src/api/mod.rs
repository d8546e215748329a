//! HTTP API Module
//!
//! - `state`: shared application state
//! - `health`: liveness and readiness probes
//! - `regions`: region lookups, assignment, heartbeats and id allocation
//! - `metrics`: Prometheus metrics endpoint
//! - `error`: error to status code mapping

mod error;
mod health;
mod metrics;
mod regions;
mod state;

pub use error::ApiError;
pub use regions::HeartbeatRequest;
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Regions
        .route("/regions", get(regions::list_regions))
        .route("/regions/{host}", get(regions::get_region))
        .route("/locate/{id}", get(regions::locate))
        // Membership
        .route("/heartbeat", post(regions::heartbeat))
        .route("/nodes", get(regions::list_nodes))
        // Ids
        .route("/id", post(regions::new_id))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        .route("/version", get(regions::get_version))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MasterConfig;
    use crate::coordination::{MemoryCoordination, MASTER_ADDR_KEY};
    use crate::master::Master;
    use crate::notifier::PeerNotifier;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt; // for `oneshot`

    struct NullNotifier;

    #[async_trait]
    impl PeerNotifier for NullNotifier {
        async fn region_set(&self, _host: &str, _begin: i32, _end: i32) -> crate::notifier::Result<()> {
            Ok(())
        }
    }

    async fn test_router(leader: bool) -> Router {
        let config = MasterConfig::default();
        let store = Arc::new(MemoryCoordination::new());
        store.put(MASTER_ADDR_KEY, &config.advertise_addr);

        let master = Arc::new(Master::new(config, store, Arc::new(NullNotifier)));
        if leader {
            master.become_leader().await.unwrap();
        }
        create_router(AppState::new(master))
    }

    async fn make_request(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");

        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);

        (status, json)
    }

    #[tokio::test]
    async fn test_follower_serves_whole_key_space() {
        let app = test_router(false).await;

        let (status, body) = make_request(&app, Method::GET, "/regions", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{"Begin": 0, "End": 9973, "Host": ""}]));
    }

    #[tokio::test]
    async fn test_follower_rejects_cluster_calls() {
        let app = test_router(false).await;

        let (status, _) = make_request(&app, Method::GET, "/regions/10.0.0.1:7000", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = make_request(&app, Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_region_assignment_and_lookup() {
        let app = test_router(true).await;

        let (status, body) = make_request(&app, Method::GET, "/regions/10.0.0.1:7000", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"Begin": 0, "End": 9973, "Host": "10.0.0.1:7000"}));

        let (status, body) = make_request(&app, Method::GET, "/regions/10.0.0.2:7000", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Begin"], 4987);

        let (status, body) = make_request(&app, Method::GET, "/locate/12", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Host"], "10.0.0.1:7000");

        let (_, body) = make_request(&app, Method::GET, "/regions", None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_locate_on_empty_cluster_is_not_found() {
        let app = test_router(true).await;

        let (status, _) = make_request(&app, Method::GET, "/locate/12", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_heartbeat_and_nodes() {
        let app = test_router(true).await;
        make_request(&app, Method::GET, "/regions/10.0.0.1:7000", None).await;

        let (status, _) = make_request(
            &app,
            Method::POST,
            "/heartbeat",
            Some(json!({"host": "10.0.0.1:7000"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // unknown hosts are accepted but not registered
        let (status, _) = make_request(
            &app,
            Method::POST,
            "/heartbeat",
            Some(json!({"host": "10.0.0.9:7000"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = make_request(&app, Method::GET, "/nodes", None).await;
        assert_eq!(status, StatusCode::OK);
        let hosts: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["host"].as_str().unwrap())
            .collect();
        assert_eq!(hosts, vec!["10.0.0.1:7000"]);
    }

    #[tokio::test]
    async fn test_new_id() {
        let app = test_router(true).await;

        let (status, first) = make_request(&app, Method::POST, "/id", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, second) = make_request(&app, Method::POST, "/id", None).await;

        assert!(second["id"].as_i64().unwrap() > first["id"].as_i64().unwrap());
    }

    #[tokio::test]
    async fn test_follower_rejects_new_id() {
        let app = test_router(false).await;

        let (status, _) = make_request(&app, Method::POST, "/id", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let app = test_router(true).await;

        let (status, _) = make_request(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = make_request(&app, Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let app = test_router(false).await;

        let (status, _) = make_request(&app, Method::GET, "/metrics", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_version() {
        let app = test_router(false).await;

        let (status, body) = make_request(&app, Method::GET, "/version", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], crate::version::VERSION);
    }
}
