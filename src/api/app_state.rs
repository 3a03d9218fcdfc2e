use crate::observability::AppMetrics;
use crate::services::temporal_query::TemporalQueryService;
use std::sync::Arc;

/// Application state containing all shared services
#[derive(Clone)]
pub struct AppState {
    /// Temporal query service
    pub temporal_service: Arc<dyn TemporalQueryService>,
    /// Request counters shared with the metrics endpoint
    pub metrics: Arc<AppMetrics>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("temporal_service", &"Arc<dyn TemporalQueryService>")
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl AppState {
    /// Create new application state
    pub fn new(temporal_service: Arc<dyn TemporalQueryService>, metrics: Arc<AppMetrics>) -> Self {
        Self {
            temporal_service,
            metrics,
        }
    }
}
