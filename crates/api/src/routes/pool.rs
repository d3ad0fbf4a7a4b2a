use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use engine::PoolReview;

use crate::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/pool/review", post(review_pool))
}

#[derive(Debug, Deserialize)]
struct PoolReviewRequest {
    /// Current pool members.
    #[serde(default)]
    pool: Vec<String>,
    /// Instruments considered for entry.
    #[serde(default)]
    candidates: Vec<String>,
}

async fn review_pool(
    State(state): State<AppState>,
    payload: Result<Json<PoolReviewRequest>, JsonRejection>,
) -> Result<Json<PoolReview>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(state.engine.review_pool(req.pool, req.candidates).await?))
}
