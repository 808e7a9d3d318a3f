use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::batch::{BatchItem, BatchSummary};
use crate::context::AppContext;
use crate::domain::CreationResult;
use crate::error::{AppError, AppResult};

const MAX_BATCH_SIZE: usize = 1000;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub summary: BatchSummary,
    pub results: Vec<CreationResult>,
}

fn check_batch(items: &[BatchItem]) -> AppResult<()> {
    if items.is_empty() {
        return Err(AppError::validation("batch must not be empty"));
    }
    if items.len() > MAX_BATCH_SIZE {
        return Err(AppError::validation(format!(
            "batch exceeds maximum size of {MAX_BATCH_SIZE}"
        )));
    }
    Ok(())
}

/// POST /api/entities/batch — per-item results plus the aggregate summary.
pub async fn submit(
    State(ctx): State<Arc<AppContext>>,
    Json(items): Json<Vec<BatchItem>>,
) -> AppResult<Json<BatchResponse>> {
    check_batch(&items)?;
    let (results, summary) = ctx.batch.submit_summarized(items).await;
    Ok(Json(BatchResponse { summary, results }))
}

/// POST /api/entities/batch/simple — aggregate summary only.
pub async fn submit_simple(
    State(ctx): State<Arc<AppContext>>,
    Json(items): Json<Vec<BatchItem>>,
) -> AppResult<Json<BatchSummary>> {
    check_batch(&items)?;
    let (_, summary) = ctx.batch.submit_summarized(items).await;
    Ok(Json(summary))
}
