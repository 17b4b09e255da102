use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub queue: QueueHealth,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueHealth {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub capacity: usize,
}

/// GET /health — liveness plus current queue load.
///
/// Reports "busy" while the queue is at capacity; the service itself is still up.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.queue.stats();
    let status = if stats.queued >= stats.capacity {
        "busy"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        queue: QueueHealth {
            queued: stats.queued,
            processing: stats.processing,
            completed: stats.completed,
            failed: stats.failed,
            capacity: stats.capacity,
        },
    })
}
