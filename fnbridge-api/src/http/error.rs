// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use fnbridge_fnos::FnosError;
use fnbridge_proxy::ProxyError;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert core errors to HTTP errors
impl From<fnbridge_core::Error> for AppError {
    fn from(err: fnbridge_core::Error) -> Self {
        use fnbridge_core::Error;

        match err {
            Error::NotFound(msg) => Self::not_found(msg),
            Error::Unauthorized(msg) => Self::unauthorized(msg),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::Upstream(msg) => Self::bad_gateway(msg),
            Error::UpstreamTimeout(msg) => Self::gateway_timeout(msg),
            Error::Certificate(msg) => {
                tracing::error!("Backend certificate error: {msg}");
                Self::bad_gateway("Backend certificate verification failed")
            }
            Error::SessionExpired(msg) => Self::bad_gateway(msg),
            Error::NoTranscodeMetadata(id) => {
                Self::internal(format!("No transcode metadata for {id}"))
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {e}");
                Self::internal("Data processing error")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                Self::internal("Internal error")
            }
        }
    }
}

impl From<FnosError> for AppError {
    fn from(err: FnosError) -> Self {
        fnbridge_core::Error::from(err).into()
    }
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::HeaderTimeout => Self::gateway_timeout("Upstream header timeout"),
            ProxyError::Certificate(msg) => {
                tracing::error!("Upstream certificate error: {msg}");
                Self::bad_gateway("Upstream certificate verification failed")
            }
            ProxyError::Upstream(msg) => Self::bad_gateway(msg),
            ProxyError::Response(msg) => Self::internal(msg),
        }
    }
}
