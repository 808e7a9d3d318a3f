use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

pub mod batch;
pub mod entities;
pub mod health;
pub mod messages;

pub fn create_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Synchronous creation path
        .route("/api/entities", post(entities::create).get(entities::list))
        .route("/api/entities/:id", get(entities::get_by_id))
        // Batch submission
        .route("/api/entities/batch", post(batch::submit))
        .route("/api/entities/batch/simple", post(batch::submit_simple))
        // Asynchronous pipeline
        .route("/api/messages/send", post(messages::send))
        .route(
            "/api/messages/status/:message_id",
            get(messages::status_by_id),
        )
        .route(
            "/api/messages/status/key/:idempotency_key",
            get(messages::status_by_key),
        )
        .route("/api/messages", get(messages::list))
        .route("/api/messages/statistics", get(messages::statistics))
        .route("/api/messages/cleanup", delete(messages::cleanup))
        // Operational endpoints
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
