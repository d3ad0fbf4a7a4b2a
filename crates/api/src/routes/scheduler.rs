use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use engine::{SchedulerCommand, SchedulerHandle};

use crate::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/scheduler", get(scheduler_state))
        .route("/api/scheduler/:command", post(scheduler_command))
}

fn handle(state: &AppState) -> Result<&SchedulerHandle, ApiError> {
    state
        .scheduler
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("scheduler".into()))
}

async fn scheduler_state(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let scheduler = handle(&state)?;
    Ok(Json(json!({ "state": scheduler.state().await })))
}

/// Stop is reserved for shutdown and is not reachable from here.
async fn scheduler_command(
    State(state): State<AppState>,
    Path(command): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let cmd = match command.as_str() {
        "start" => SchedulerCommand::Start,
        "pause" => SchedulerCommand::Pause,
        "resume" => SchedulerCommand::Resume,
        "run" => SchedulerCommand::RunNow,
        other => return Err(ApiError::BadRequest(format!("unknown scheduler command '{other}'"))),
    };
    handle(&state)?.send(cmd).await;
    Ok((StatusCode::ACCEPTED, Json(json!({ "command": command }))))
}
