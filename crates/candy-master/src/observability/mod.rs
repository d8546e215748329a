//! Observability
//!
//! - `tracing`: subscriber setup with optional OTLP export
//! - `metrics`: Prometheus metrics for rebalancing, membership and remote calls
//! - `events`: structured cluster events with consistent fields

pub mod events;
pub mod metrics;
pub mod tracing;

pub use metrics::{init_metrics, MetricsState};
pub use tracing::{init_tracing, shutdown_tracing, LogFormat, TracingConfig};
