mod health;
mod pool;
mod scheduler;
mod scoring;
mod signals;
mod strategies;
mod ws;

use axum::{middleware, Router};

use crate::{auth::require_auth, AppState};

pub use health::health_router;
pub use ws::ws_router;

/// Bearer-protected `/api/*` routes.
pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(strategies::router())
        .merge(signals::router())
        .merge(scoring::router())
        .merge(pool::router())
        .merge(scheduler::router())
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}
