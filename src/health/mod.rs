//! Health check endpoints
//!
//! Serves liveness and readiness probes for the pipeline process:
//! - `/health/live` - is the process running?
//! - `/health/ready` - pipeline state: dead trackers, queue depth, DLQ depth
//!
//! Trackers that crossed the failure-streak limit surface here as
//! `dead_trackers`, which is how operators notice silently failing
//! competitor URLs.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::models::TrackerStatus;
use crate::queue::JobQueue;
use crate::storage::TrackerStore;

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Liveness probe response
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_secs: u64,
    pub timestamp: String,
}

/// Readiness probe response with pipeline counters
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub dead_trackers: u64,
    pub queue_depth: u64,
    pub dlq_depth: u64,
    pub timestamp: String,
}

/// Shared state behind the health router
#[derive(Clone)]
pub struct HealthState {
    trackers: Arc<dyn TrackerStore>,
    queue: Arc<dyn JobQueue>,
    started: Instant,
}

impl HealthState {
    pub fn new(trackers: Arc<dyn TrackerStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            trackers,
            queue,
            started: Instant::now(),
        }
    }
}

/// Build the health router
pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn live(State(state): State<HealthState>) -> impl IntoResponse {
    Json(LivenessResponse {
        status: HealthStatus::Healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn ready(State(state): State<HealthState>) -> impl IntoResponse {
    let dead_trackers = state
        .trackers
        .count_by_status(TrackerStatus::Dead)
        .unwrap_or(0);
    let queue_depth = state.queue.depth().unwrap_or(0);
    let dlq_depth = state.queue.dlq_depth().unwrap_or(0);

    let status = if state.trackers.count_by_status(TrackerStatus::Dead).is_err() {
        HealthStatus::Unhealthy
    } else if dead_trackers > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let response = ReadinessResponse {
        status,
        dead_trackers,
        queue_depth,
        dlq_depth,
        timestamp: Utc::now().to_rfc3339(),
    };
    (status.status_code(), Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryJobQueue;
    use crate::storage::{MemoryTrackerStore, TrackerStore};
    use uuid::Uuid;

    fn state() -> (HealthState, Arc<MemoryTrackerStore>) {
        let trackers = Arc::new(MemoryTrackerStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        (
            HealthState::new(trackers.clone(), queue),
            trackers,
        )
    }

    #[tokio::test]
    async fn test_ready_reports_dead_trackers() {
        let (state, trackers) = state();

        let (tracker, _) = trackers
            .create_or_get(crate::models::NewTracker {
                product_id: Uuid::new_v4(),
                competitor_name: "Shopmart".to_string(),
                raw_url: "https://shop.example.com/p/1".to_string(),
                canonical_url: "https://shop.example.com/p/1".to_string(),
                active: true,
                check_interval_secs: None,
            })
            .unwrap();
        trackers.mark_dead(tracker.id).unwrap();

        let dead = state
            .trackers
            .count_by_status(TrackerStatus::Dead)
            .unwrap();
        assert_eq!(dead, 1);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(HealthStatus::Healthy.status_code(), StatusCode::OK);
        assert_eq!(HealthStatus::Degraded.status_code(), StatusCode::OK);
        assert_eq!(
            HealthStatus::Unhealthy.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
