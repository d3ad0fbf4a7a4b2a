use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/presets/:preset", post(create_from_preset))
        .route("/api/signals/generate", post(generate_signals))
        .route("/api/signals/latest", get(latest_signals))
}

// ─── Presets ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct PresetRequest {
    name: Option<String>,
}

async fn create_from_preset(
    State(state): State<AppState>,
    Path(preset): Path<String>,
    body: Option<Json<PresetRequest>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let name = body.and_then(|Json(b)| b.name);
    let id = state.engine.create_from_preset(&preset, name).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id, "preset": preset }))))
}

// ─── Signals ──────────────────────────────────────────────────────────────────

async fn generate_signals(State(state): State<AppState>) -> Json<Value> {
    let signals = state.engine.generate_signals().await;
    Json(json!({
        "count": signals.len(),
        "signals": signals,
    }))
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    strategy_id: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn latest_signals(
    State(state): State<AppState>,
    Query(q): Query<LatestQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = q.limit.unwrap_or(50);
    let offset = q.offset.unwrap_or(0);
    let signals = state
        .engine
        .get_signals(q.strategy_id.as_deref(), limit, offset)
        .await?;
    Ok(Json(json!({
        "signals": signals,
        "count": signals.len(),
        "limit": limit,
        "offset": offset,
    })))
}
