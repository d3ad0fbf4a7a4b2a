use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use common::{parameter_schema, FactorScore, StrategyType};
use strategy::best_parameters;

use crate::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/scores/:code", get(score_instrument))
        .route("/api/schemas/:strategy_type", get(get_schema))
}

async fn score_instrument(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<FactorScore>, ApiError> {
    Ok(Json(state.engine.score_instrument(&code).await?))
}

/// Parameter schema plus the best known parameters for the type.
async fn get_schema(Path(strategy_type): Path<String>) -> Result<Json<Value>, ApiError> {
    let strategy_type: StrategyType = strategy_type.parse()?;
    Ok(Json(json!({
        "schema": parameter_schema(strategy_type),
        "recommended": best_parameters(strategy_type).to_map(),
    })))
}
