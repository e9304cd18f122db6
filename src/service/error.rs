//! HTTP-facing error type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::error::ClassifyError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    /// Malformed JSON body or missing field
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The inference worker has stopped
    #[error("inference worker is not running")]
    Unavailable,
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Classify(e) => e.kind(),
            ServiceError::InvalidRequest(_) => "InvalidRequest",
            ServiceError::Unavailable => "Unavailable",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Classify(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ServiceError::Classify(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    kind: &'a str,
    message: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.kind(), "Request failed: {self}");
        } else {
            warn!(kind = self.kind(), "Request rejected: {self}");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
