//! # Error Handling
//!
//! This module defines the application's error type and how it is converted to HTTP responses.
//!
//! ## Error Categories:
//! - **ValidationError**: the user submitted something unusable (no file, bad filename)
//! - **NotFound**: a referenced file or resource does not exist
//! - **Transcription**: the model or audio decoder failed (corrupt audio, unknown language, ...)
//! - **PayloadTooLarge**: the upload exceeded `MAX_UPLOAD_SIZE`
//! - **BadRequest**: the request itself was malformed (broken multipart body)
//! - **Startup**: the process cannot start serving (lock held, no free port)
//! - **ConfigError** / **Internal**: server-side problems
//!
//! ## Containment:
//! Per-request failures never escape their request. The upload handler turns
//! ValidationError, NotFound and Transcription into flashed messages; the
//! remaining variants become JSON error bodies through [`ResponseError`].
//! Only `Startup` is allowed to end the process.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::ValidationError("Invalid filename".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (temp directory creation, blocking pool failures, etc.)
    Internal(String),

    /// Client sent a malformed request body
    BadRequest(String),

    /// Requested file or resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// The speech model or audio decoder rejected the input
    Transcription(String),

    /// Upload exceeded the configured size limit (megabytes)
    PayloadTooLarge(u64),

    /// The process cannot start serving
    Startup(String),
}

impl AppError {
    /// Message suitable for showing to the user on the upload page.
    ///
    /// Validation messages are shown verbatim; everything else keeps its
    /// category prefix.
    pub fn user_message(&self) -> String {
        match self {
            AppError::ValidationError(msg) => msg.clone(),
            AppError::Transcription(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Transcription(msg) => write!(f, "Transcription failed: {}", msg),
            AppError::PayloadTooLarge(limit_mb) => {
                write!(f, "Upload exceeds the {} MB limit", limit_mb)
            }
            AppError::Startup(msg) => write!(f, "Startup failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into JSON HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError/Startup → 500
/// - BadRequest/ValidationError → 400
/// - NotFound → 404
/// - PayloadTooLarge → 413
/// - Transcription → 422
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "payload_too_large",
///     "message": "Upload exceeds the 200 MB limit",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) | AppError::Startup(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Transcription(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error_type = match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::ConfigError(_) => "config_error",
            AppError::ValidationError(_) => "validation_error",
            AppError::Transcription(_) => "transcription_error",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::Startup(_) => "startup_error",
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// `anyhow` errors from the model backend are external failures.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Full context chain.
        AppError::Transcription(format!("{:#}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Malformed upload: {}", err))
    }
}

impl From<actix_web::error::BlockingError> for AppError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        AppError::Internal(format!("Blocking task failed: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
