use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors (store-error).
    DatabaseError(sqlx::Error),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Error interacting with an external API.
    ExternalApiError(String),
    /// Internal server error.
    InternalError(String),
    /// Status change not allowed by the prospect state machine.
    InvalidTransition(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Stable label used in loop-level error logs.
    pub fn error_kind(&self) -> &'static str {
        match self {
            AppError::DatabaseError(_) => "store_error",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::ExternalApiError(_) => "external_api_error",
            AppError::InternalError(_) => "internal_error",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::WithContext { source, .. } => source.error_kind(),
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::InvalidTransition(msg) => write!(f, "Invalid status transition: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "External service error".to_string(),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::InvalidTransition(msg) => (StatusCode::CONFLICT, msg),
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return source.into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApiError(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }
}

impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }
}

/// Failure of a single source call.
///
/// Contained by the orchestrator; never escapes a candidate cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Timeout, connection reset, provider 5xx.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Provider quota hit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Bad credentials. Disables the source for the rest of the process.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Malformed provider response.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Circuit breaker rejected the call.
    #[error("circuit open for {0}")]
    CircuitOpen(String),

    /// Source paused after a rate limit.
    #[error("source {0} cooling down after rate limit")]
    CoolingDown(String),

    /// Source disabled after an auth failure.
    #[error("source {0} disabled")]
    Disabled(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::TransientNetwork(_)
                | SourceError::RateLimited(_)
                | SourceError::CircuitOpen(_)
                | SourceError::CoolingDown(_)
        )
    }

    /// Stable snake-case label persisted in the attempt table.
    pub fn error_kind(&self) -> &'static str {
        match self {
            SourceError::TransientNetwork(_) => "transient_network",
            SourceError::RateLimited(_) => "rate_limited",
            SourceError::Auth(_) => "auth_error",
            SourceError::Parse(_) => "parse_error",
            SourceError::CircuitOpen(_) => "circuit_open",
            SourceError::CoolingDown(_) => "cooling_down",
            SourceError::Disabled(_) => "disabled",
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = format!("status {}: {}", status, truncate(body, 200));
        match status.as_u16() {
            429 => SourceError::RateLimited(detail),
            401 | 403 => SourceError::Auth(detail),
            // 402 is how several providers report an exhausted plan
            402 => SourceError::RateLimited(detail),
            s if s >= 500 => SourceError::TransientNetwork(detail),
            _ => SourceError::Parse(detail),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            SourceError::from_status(status, &err.to_string())
        } else {
            SourceError::TransientNetwork(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        use reqwest::StatusCode;
        assert_eq!(
            SourceError::from_status(StatusCode::TOO_MANY_REQUESTS, "").error_kind(),
            "rate_limited"
        );
        assert_eq!(SourceError::from_status(StatusCode::UNAUTHORIZED, "").error_kind(), "auth_error");
        assert_eq!(SourceError::from_status(StatusCode::FORBIDDEN, "").error_kind(), "auth_error");
        assert_eq!(
            SourceError::from_status(StatusCode::BAD_GATEWAY, "").error_kind(),
            "transient_network"
        );
        assert_eq!(SourceError::from_status(StatusCode::BAD_REQUEST, "").error_kind(), "parse_error");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(SourceError::TransientNetwork("reset".into()).is_retryable());
        assert!(SourceError::RateLimited("quota".into()).is_retryable());
        assert!(!SourceError::Auth("bad key".into()).is_retryable());
        assert!(!SourceError::Parse("eof".into()).is_retryable());
    }

    #[test]
    fn test_context_keeps_kind() {
        let err: Result<(), AppError> = Err(AppError::DatabaseError(sqlx::Error::RowNotFound));
        let err = err.context("upserting prospect").unwrap_err();
        assert_eq!(err.error_kind(), "store_error");
        assert!(err.to_string().starts_with("upserting prospect: Database error"));
    }

    #[test]
    fn test_response_status_mapping() {
        assert_eq!(
            AppError::NotFound("missing".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::DatabaseError(sqlx::Error::PoolTimedOut).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let wrapped: Result<(), AppError> = Err(AppError::InvalidTransition("new -> qualified".into()));
        let wrapped = wrapped.context("updating status").unwrap_err();
        assert_eq!(wrapped.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
