use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::context::AppContext;
use crate::domain::{BankEntity, CreationResult, FailureKind, NewBankEntity};
use crate::error::{AppError, AppResult};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

fn idempotency_key(headers: &HeaderMap) -> AppResult<String> {
    let value = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .ok_or_else(|| AppError::InvalidKey("Idempotency-Key header is required".to_string()))?;
    let key = value
        .to_str()
        .map_err(|_| AppError::InvalidKey("Idempotency-Key header is not valid UTF-8".to_string()))?;
    Ok(key.to_string())
}

/// Map a creation outcome onto an HTTP response. Every outcome carries the
/// tagged result body, so callers can always branch on `status`.
pub fn result_response(result: CreationResult) -> (StatusCode, Json<CreationResult>) {
    let status = match &result {
        CreationResult::Created { .. } => StatusCode::CREATED,
        CreationResult::Duplicate { .. } => StatusCode::CONFLICT,
        CreationResult::Failed { kind, .. } => match kind {
            FailureKind::InvalidKey => StatusCode::BAD_REQUEST,
            FailureKind::LockTimeout => StatusCode::REQUEST_TIMEOUT,
            FailureKind::Processing => StatusCode::INTERNAL_SERVER_ERROR,
        },
    };
    (status, Json(result))
}

/// POST /api/entities
pub async fn create(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(payload): Json<NewBankEntity>,
) -> AppResult<(StatusCode, Json<CreationResult>)> {
    let key = idempotency_key(&headers)?;
    let result = ctx.service.create(&key, payload).await;
    Ok(result_response(result))
}

/// GET /api/entities/:id
pub async fn get_by_id(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BankEntity>> {
    Ok(Json(ctx.service.find_by_id(id).await?))
}

/// GET /api/entities
pub async fn list(State(ctx): State<Arc<AppContext>>) -> AppResult<Json<Vec<BankEntity>>> {
    Ok(Json(ctx.service.list().await?))
}
