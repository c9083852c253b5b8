//! Error types and handling for the auto-reply proxy.
//!
//! Every failure a handler can produce is a variant of [`AppError`]. The
//! conversion into an HTTP response happens in one place so that each
//! terminal state ends in the same `{"error": code, "details": ...}` envelope.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

pub const ERROR_CODE_KEY_NOT_CONFIGURED: &str = "openai-key-not-configured";
pub const ERROR_CODE_UNAUTHORIZED: &str = "unauthorized";
pub const ERROR_CODE_INVALID_REQUEST: &str = "invalid-request";
pub const ERROR_CODE_NO_AUDIO: &str = "no-audio-provided";
pub const ERROR_CODE_INVALID_AUDIO: &str = "invalid-audio-format";
pub const ERROR_CODE_UPSTREAM: &str = "openai_error";
pub const ERROR_CODE_PROXY: &str = "proxy-error";
pub const ERROR_CODE_UPSTREAM_UNAVAILABLE: &str = "upstream-unavailable";
pub const ERROR_CODE_RATE_LIMIT: &str = "rate-limit-exceeded";

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// No upstream API key is configured
    #[error("Upstream API key is not configured")]
    MissingApiKey,

    /// Shared secret header missing or wrong
    #[error("Unauthorized")]
    Unauthorized,

    /// Client sent a body that could not be parsed
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Transcription request without audio
    #[error("No audio provided")]
    NoAudio,

    /// Audio payload is not valid base64
    #[error("Invalid audio format: {0}")]
    InvalidAudio(String),

    /// Caller exceeded its request quota
    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Provider answered with an error status; forwarded as-is
    #[error("Upstream returned HTTP {status}")]
    Upstream { status: StatusCode, body: Value },

    /// Transport failure talking to the provider
    #[error("Upstream request failed: {0}")]
    Gateway(String),

    /// The retry loop ended without ever receiving a response
    #[error("No response received from upstream after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingApiKey => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) | AppError::NoAudio | AppError::InvalidAudio(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream { status, .. } => *status,
            AppError::Gateway(_) | AppError::RetriesExhausted { .. } => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code placed in the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::MissingApiKey => ERROR_CODE_KEY_NOT_CONFIGURED,
            AppError::Unauthorized => ERROR_CODE_UNAUTHORIZED,
            AppError::BadRequest(_) => ERROR_CODE_INVALID_REQUEST,
            AppError::NoAudio => ERROR_CODE_NO_AUDIO,
            AppError::InvalidAudio(_) => ERROR_CODE_INVALID_AUDIO,
            AppError::RateLimited { .. } => ERROR_CODE_RATE_LIMIT,
            AppError::Upstream { .. } => ERROR_CODE_UPSTREAM,
            AppError::Gateway(_) | AppError::Internal(_) => ERROR_CODE_PROXY,
            AppError::RetriesExhausted { .. } => ERROR_CODE_UPSTREAM_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let retry_after = match &self {
            AppError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let details = match self {
            AppError::Upstream { body, .. } => body,
            other => Value::String(other.to_string()),
        };

        let mut response = (
            status,
            Json(json!({
                "error": code,
                "details": details,
            })),
        )
            .into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
