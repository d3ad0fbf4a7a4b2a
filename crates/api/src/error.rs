use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use common::Error;

/// Maps engine errors onto HTTP status codes.
#[derive(Debug)]
pub enum ApiError {
    Engine(Error),
    BadRequest(String),
    NotFound(String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Engine(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Engine(Error::Validation { field, message }) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "validation", "field": field, "message": message }),
            ),
            ApiError::Engine(Error::NotFound(what)) | ApiError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not_found", "message": format!("{what} not found") }),
            ),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "bad_request", "message": message }),
            ),
            ApiError::Engine(other) => {
                warn!(error = %other, "Request failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error": "unavailable", "message": other.to_string() }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
