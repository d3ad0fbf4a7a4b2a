use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{debug, warn};

use common::TradingSignal;

use crate::{auth::token_matches, AppState};

pub fn ws_router() -> Router<AppState> {
    Router::new().route("/ws/signals", get(ws_signals_handler))
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Streams every newly emitted signal as a JSON text frame.
/// Auth via query param `?token=<API_TOKEN>` (header auth not supported
/// in browser WebSocket API).
async fn ws_signals_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<WsQuery>,
) -> Response {
    let authed = q
        .token
        .as_deref()
        .is_some_and(|t| token_matches(t, &state.api_token));

    if !authed {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    let signal_rx = state.engine.subscribe();
    ws.on_upgrade(move |socket| handle_ws(socket, signal_rx))
}

async fn handle_ws(socket: WebSocket, mut signal_rx: Receiver<TradingSignal>) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            received = signal_rx.recv() => match received {
                Ok(signal) => {
                    let frame = match serde_json::to_string(&signal) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(signal_id = %signal.id, error = %e, "Signal not serializable");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(dropped = n, "WebSocket signal client lagged");
                }
                Err(RecvError::Closed) => break,
            },

            // Clients only ever send close frames and pings.
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("WebSocket signal client disconnected");
}
