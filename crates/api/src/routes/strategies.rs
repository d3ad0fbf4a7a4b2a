use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use common::{NewStrategy, Strategy, StrategyParams, StrategyStatus, StrategyType};
use engine::{StrategyPerformance, StrategyUpdate};
use strategy::presets::{DEFAULT_REBALANCE_FREQUENCY, DEFAULT_STOCK_POOL};

use crate::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/strategies", get(list_strategies).post(create_strategy))
        .route(
            "/api/strategies/:id",
            get(get_strategy).put(update_strategy).delete(delete_strategy),
        )
        .route("/api/strategies/:id/performance", get(get_performance))
}

#[derive(Debug, Deserialize)]
struct CreateStrategyRequest {
    name: String,
    strategy_type: StrategyType,
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default)]
    stock_universe: Option<Vec<String>>,
    #[serde(default)]
    rebalance_frequency: Option<u32>,
}

impl CreateStrategyRequest {
    fn into_new_strategy(self) -> common::Result<NewStrategy> {
        let params = StrategyParams::from_parts(self.strategy_type, &Value::Object(self.parameters))?;
        Ok(NewStrategy {
            name: self.name,
            params,
            stock_universe: self
                .stock_universe
                .unwrap_or_else(|| DEFAULT_STOCK_POOL.iter().map(|c| c.to_string()).collect()),
            rebalance_frequency: self.rebalance_frequency.unwrap_or(DEFAULT_REBALANCE_FREQUENCY),
        })
    }
}

async fn create_strategy(
    State(state): State<AppState>,
    payload: Result<Json<CreateStrategyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(request) = payload?;
    let id = state.engine.create_strategy(request.into_new_strategy()?).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_strategies(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = q
        .status
        .as_deref()
        .map(str::parse::<StrategyStatus>)
        .transpose()?;
    let limit = q.limit.unwrap_or(100);
    let offset = q.offset.unwrap_or(0);

    let strategies = state.engine.list_strategies(status, limit, offset).await?;
    Ok(Json(json!({
        "strategies": strategies,
        "count": strategies.len(),
        "limit": limit,
        "offset": offset,
    })))
}

async fn get_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Strategy>, ApiError> {
    state
        .engine
        .get_strategy(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("strategy '{id}'")))
}

async fn update_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StrategyUpdate>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(update) = payload?;
    if !state.engine.update_strategy(&id, update).await? {
        return Err(ApiError::NotFound(format!("strategy '{id}'")));
    }
    Ok(Json(json!({ "id": id, "updated": true })))
}

async fn delete_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.engine.delete_strategy(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("strategy '{id}'")))
    }
}

async fn get_performance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StrategyPerformance>, ApiError> {
    state
        .engine
        .strategy_performance(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("strategy '{id}'")))
}
