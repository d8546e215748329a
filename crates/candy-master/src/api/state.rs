//! Application State
//!
//! Shared state passed to all API handlers.

use crate::master::Master;
use crate::observability::MetricsState;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub master: Arc<Master>,
    pub metrics_state: Option<MetricsState>,
}

impl AppState {
    pub fn new(master: Arc<Master>) -> Self {
        Self {
            master,
            metrics_state: None,
        }
    }

    pub fn with_metrics(mut self, metrics_state: MetricsState) -> Self {
        self.metrics_state = Some(metrics_state);
        self
    }
}
