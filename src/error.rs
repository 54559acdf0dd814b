//! # Error Handling
//!
//! Custom error types for the application and their conversion to HTTP
//! responses and outbound error events.
//!
//! ## Error Categories:
//! - **Admission errors**: a specific inbound operation is rejected up front
//!   (unknown session, duplicate registration, rate/size limits). Never
//!   retried by the core.
//! - **Pipeline errors**: reported to the connection as an `error` event; the
//!   session keeps running (see `session::manager`).
//! - **Internal/config errors**: server-side problems surfaced as 500s on the
//!   HTTP surface.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application error type covering admission failures and server-side faults.
#[derive(Debug)]
pub enum AppError {
    /// An operation referenced a connection id with no registered session
    SessionNotInitialized,

    /// A connection id was registered twice
    DuplicateSession(String),

    /// An audio frame payload exceeded the configured byte cap
    PayloadTooLarge { size: usize, limit: usize },

    /// Too many audio frames inside the current one-second window
    AudioRateExceeded,

    /// A question-generation request arrived inside the cooldown window
    QuestionsRateExceeded,

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Internal server errors
    Internal(String),
}

impl AppError {
    /// Stable machine-readable reason code, used in outbound `error` events
    /// and in telemetry.
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::SessionNotInitialized => "SessionNotInitialized",
            AppError::DuplicateSession(_) => "DuplicateSession",
            AppError::PayloadTooLarge { .. } => "PayloadTooLarge",
            AppError::AudioRateExceeded => "AudioRateExceeded",
            AppError::QuestionsRateExceeded => "QuestionsRateExceeded",
            AppError::BadRequest(_) => "BadRequest",
            AppError::ConfigError(_) => "ConfigError",
            AppError::Internal(_) => "InternalError",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::SessionNotInitialized => {
                write!(f, "Session not initialized for this connection")
            }
            AppError::DuplicateSession(id) => {
                write!(f, "Session for connection '{}' already exists", id)
            }
            AppError::PayloadTooLarge { size, limit } => {
                write!(f, "Audio payload of {} bytes exceeds the {} byte limit", size, limit)
            }
            AppError::AudioRateExceeded => write!(f, "Audio frame rate limit exceeded"),
            AppError::QuestionsRateExceeded => {
                write!(f, "Question generation requested during cooldown")
            }
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Conversion of errors into HTTP responses for the REST surface.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "PayloadTooLarge",
///     "message": "Audio payload of 9000 bytes exceeds the 4096 byte limit",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let status = match self {
            AppError::SessionNotInitialized => StatusCode::NOT_FOUND,
            AppError::DuplicateSession(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::AudioRateExceeded | AppError::QuestionsRateExceeded => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ConfigError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": self.reason(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        assert_eq!(AppError::SessionNotInitialized.reason(), "SessionNotInitialized");
        assert_eq!(
            AppError::PayloadTooLarge { size: 9000, limit: 4096 }.reason(),
            "PayloadTooLarge"
        );
        assert_eq!(AppError::AudioRateExceeded.reason(), "AudioRateExceeded");
        assert_eq!(AppError::QuestionsRateExceeded.reason(), "QuestionsRateExceeded");
    }

    #[test]
    fn test_display_includes_limits() {
        let err = AppError::PayloadTooLarge { size: 9000, limit: 4096 };
        let text = err.to_string();
        assert!(text.contains("9000"));
        assert!(text.contains("4096"));
    }
}
