//! Bridges engine errors to HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::engine::EngineError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Engine error carried up to the HTTP boundary. Status codes follow the
/// error taxonomy: conflicts are 409 with a code that distinguishes a
/// duplicate slot from a taken instant, bans are 403, WAL trouble is 500.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::SlotExists { .. }
            | EngineError::SlotOccupied { .. }
            | EngineError::SlotAlreadyBooked { .. } => StatusCode::CONFLICT,
            EngineError::Banned(_) => StatusCode::FORBIDDEN,
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::WalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), "request failed: {}", self.0);
        }
        let body = ErrorBody {
            code: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}
