use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::types::{EntityMessage, MessageStatus};
use crate::broker::RequestTransport;
use crate::config::SECONDS_PER_MINUTE;
use crate::context::AppContext;
use crate::domain::{parse_idempotency_key, NewBankEntity};
use crate::error::{AppError, AppResult};
use crate::tracking::{MessageTracker, TrackingStats};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// Optional in the body; may also arrive as the Idempotency-Key header.
    /// Generated when absent from both.
    pub idempotency_key: Option<String>,
    #[serde(flatten)]
    pub payload: NewBankEntity,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub message_id: String,
    pub idempotency_key: String,
    pub status: String,
}

/// POST /api/messages/send — accept a creation request for asynchronous
/// processing. Acceptance means validated, tracked and published; the
/// idempotency decision happens later in the consumer.
pub async fn send(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> AppResult<(StatusCode, Json<SendResponse>)> {
    // Header takes precedence over the body field; absent both, the service
    // assigns a key so the caller still gets a handle for deduplication
    let key = match headers
        .get(super::entities::IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(request.idempotency_key)
    {
        Some(key) => {
            parse_idempotency_key(&key)?;
            key
        }
        None => Uuid::new_v4().to_string(),
    };
    request.payload.validate()?;

    let message = accept(
        ctx.tracker.as_ref(),
        ctx.transport.as_ref(),
        &key,
        &request.payload,
    )
    .await?;

    info!(
        message_id = %message.message_id,
        idempotency_key = %message.idempotency_key,
        "Creation request accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SendResponse {
            message_id: message.message_id,
            idempotency_key: key,
            status: "accepted".to_string(),
        }),
    ))
}

/// Track and publish one creation request.
///
/// A publish failure settles the tracked record as Failed before the error
/// is surfaced: age-based cleanup never purges non-terminal records, so a
/// record left Pending for a request the broker rejected would linger
/// forever and report a status that never happened.
async fn accept(
    tracker: &dyn MessageTracker,
    transport: &dyn RequestTransport,
    key: &str,
    payload: &NewBankEntity,
) -> AppResult<EntityMessage> {
    let mut message = EntityMessage::new(key, payload);
    tracker.track(&message).await?;

    if let Err(e) = transport.publish_request(&message).await {
        message.status = MessageStatus::Failed;
        message.error_message = Some(e.to_string());
        if let Err(update_err) = tracker.update(&message).await {
            warn!(
                message_id = %message.message_id,
                error = %update_err,
                "Failed to settle record for unpublished message"
            );
        }
        return Err(e);
    }

    Ok(message)
}

/// GET /api/messages/status/:message_id
pub async fn status_by_id(
    State(ctx): State<Arc<AppContext>>,
    Path(message_id): Path<String>,
) -> AppResult<Json<EntityMessage>> {
    ctx.tracker
        .get_by_message_id(&message_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("message {message_id}")))
}

/// GET /api/messages/status/key/:idempotency_key — status of the latest
/// message submitted under this key.
pub async fn status_by_key(
    State(ctx): State<Arc<AppContext>>,
    Path(idempotency_key): Path<String>,
) -> AppResult<Json<EntityMessage>> {
    ctx.tracker
        .get_by_key(&idempotency_key)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no message for key {idempotency_key}")))
}

/// GET /api/messages
pub async fn list(State(ctx): State<Arc<AppContext>>) -> AppResult<Json<Vec<EntityMessage>>> {
    Ok(Json(ctx.tracker.list().await?))
}

/// GET /api/messages/statistics
pub async fn statistics(State(ctx): State<Arc<AppContext>>) -> AppResult<Json<TrackingStats>> {
    Ok(Json(ctx.tracker.statistics().await?))
}

#[derive(Deserialize)]
pub struct CleanupParams {
    /// Purge terminal messages older than this many minutes
    pub max_age_minutes: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub removed: usize,
    pub max_age_minutes: i64,
}

const DEFAULT_CLEANUP_AGE_MINUTES: i64 = 60;

/// DELETE /api/messages/cleanup?max_age_minutes=N — purge terminal records.
/// Idempotent: a second call with nothing left to purge removes zero.
pub async fn cleanup(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<CleanupParams>,
) -> AppResult<Json<CleanupResponse>> {
    let minutes = params.max_age_minutes.unwrap_or(DEFAULT_CLEANUP_AGE_MINUTES);
    if minutes < 0 {
        return Err(AppError::validation("max_age_minutes must not be negative"));
    }

    let max_age = chrono::Duration::seconds(minutes * SECONDS_PER_MINUTE);
    let removed = ctx.tracker.clean_old(max_age).await?;
    info!(removed, max_age_minutes = minutes, "Tracked message cleanup");

    Ok(Json(CleanupResponse {
        removed,
        max_age_minutes: minutes,
    }))
}
