//! # Error Handling
//!
//! Every failure the gateway can produce is one variant of [`AppError`].
//! Handlers return `AppResult<T>` and actix turns the error into a JSON
//! response through the `ResponseError` impl below.
//!
//! ## Error Categories:
//! - **Client errors** (4xx): `Validation`, `NotFound`
//! - **Cache filesystem errors** (500): `Write`, `Directory`
//! - **Batch errors**: `Engine`, `Parse` are normally recorded into a task's
//!   `errors` list rather than returned over HTTP. They only reach a client
//!   on the synchronous single-file path.
//! - **Programming errors** (500): `InvalidTransition`, `Internal`, `Config`

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// Each variant carries a human-readable message. The message is what ends up
/// in the HTTP body and in a failed task's `errors` list, so it should make
/// sense without the variant name.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Missing or empty upload, oversized file, malformed multipart body
    Validation(String),

    /// Unknown task id
    NotFound(String),

    /// Writing a cache file failed (disk full, permissions)
    Write(String),

    /// A cache area could not be created or read
    Directory(String),

    /// The inference engine raised, exited non-zero, or timed out
    Engine(String),

    /// The annotated manifest could not be parsed back
    Parse(String),

    /// A task status change that would move backwards
    InvalidTransition(String),

    /// Configuration file or environment variable problems
    Config(String),

    /// Anything else that is the server's fault
    Internal(String),
}

impl AppError {
    /// Machine-readable error type used in JSON bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Write(_) => "write_error",
            AppError::Directory(_) => "directory_error",
            AppError::Engine(_) => "engine_error",
            AppError::Parse(_) => "parse_error",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::Config(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// The bare message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::Write(msg)
            | AppError::Directory(msg)
            | AppError::Engine(msg)
            | AppError::Parse(msg)
            | AppError::InvalidTransition(msg)
            | AppError::Config(msg)
            | AppError::Internal(msg) => msg,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Write(msg) => write!(f, "Cache write error: {}", msg),
            AppError::Directory(msg) => write!(f, "Cache directory error: {}", msg),
            AppError::Engine(msg) => write!(f, "Inference engine error: {}", msg),
            AppError::Parse(msg) => write!(f, "Manifest parse error: {}", msg),
            AppError::InvalidTransition(msg) => write!(f, "Invalid task transition: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - Validation → 400 (Bad Request)
/// - NotFound → 404 (Not Found)
/// - everything else → 500 (Internal Server Error)
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "No file provided",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error_type = self.kind(), "{}", self);
        }

        HttpResponse::build(status).json(json!({
            "error": {
                "type": self.kind(),
                "message": self.message(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// anyhow errors coming out of engine adapters and startup code become
/// `Internal` unless the caller maps them more precisely first.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
