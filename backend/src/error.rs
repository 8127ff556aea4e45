//! API error taxonomy
//!
//! Every error carries a stable machine code alongside the human-readable
//! message; handlers bubble these up with `?` and the `IntoResponse` impl
//! maps them onto the documented status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("missing required field 'fen'")]
    MissingFen,

    #[error("'moves_uci' must be an array of strings")]
    InvalidMovesUci,

    #[error("'movetime_ms' must be a positive integer")]
    InvalidMovetime,

    #[error("engine error: {0}")]
    Engine(String),

    #[error("hint engine is not available")]
    StockfishUnavailable,

    #[error("unknown request id")]
    UnknownRequestId,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MissingFen => "MISSING_FEN",
            ApiError::InvalidMovesUci => "INVALID_MOVES_UCI",
            ApiError::InvalidMovetime => "INVALID_MOVETIME",
            ApiError::Engine(_) => "ENGINE_ERROR",
            ApiError::StockfishUnavailable => "STOCKFISH_UNAVAILABLE",
            ApiError::UnknownRequestId => "UNKNOWN_REQUEST_ID",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFen | ApiError::InvalidMovesUci | ApiError::InvalidMovetime => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::StockfishUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::UnknownRequestId => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
