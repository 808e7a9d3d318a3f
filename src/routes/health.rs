use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::context::AppContext;
use crate::error::AppResult;
use crate::idempotency::CoordinatorStats;
use crate::metrics::gather_metrics;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub coordinator: CoordinatorStats,
}

/// GET /health
pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        coordinator: ctx.coordinator.stats(),
    })
}

/// GET /metrics — Prometheus text format.
pub async fn metrics() -> AppResult<String> {
    gather_metrics()
}
