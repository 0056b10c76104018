// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use speechstream_hls::HlsError;
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
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
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            details: self.details,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

impl From<speechstream_core::Error> for AppError {
    fn from(err: speechstream_core::Error) -> Self {
        use speechstream_core::Error;

        match err {
            Error::InvalidInput(msg) => Self::bad_request(msg),
            other => {
                tracing::error!("Speech request failed: {other}");
                Self::internal_server_error("An internal server error occurred")
                    .with_details(other.to_string())
            }
        }
    }
}

impl From<HlsError> for AppError {
    fn from(err: HlsError) -> Self {
        match err {
            HlsError::SessionNotFound(_) => Self::not_found("Session not found"),
            HlsError::SegmentNotFound(_) => Self::not_found("Segment not found"),
            HlsError::InvalidSegmentName(name) => {
                Self::bad_request("Invalid segment name").with_details(name)
            }
            HlsError::PlaylistNotReady => Self::service_unavailable("Playlist not yet available"),
            other => {
                tracing::error!("HLS error: {other}");
                Self::internal_server_error("HLS error").with_details(other.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Anyhow error: {}", err);
        Self::internal_server_error("Internal server error")
    }
}
