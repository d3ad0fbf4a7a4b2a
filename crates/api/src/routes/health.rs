use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint, no auth required.
async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let scheduler = match &state.scheduler {
        Some(handle) => Some(handle.state().await),
        None => None,
    };
    Json(json!({
        "status": "ok",
        "strategies": state.engine.working_set_len(),
        "cached_signals": state.engine.cached_signal_count(),
        "scheduler": scheduler,
    }))
}
