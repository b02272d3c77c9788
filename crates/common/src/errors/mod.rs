//! Error types for the Avoda service
//!
//! A single error currency shared by the retrieval pipeline and the HTTP
//! surface: distinct kinds for each documented failure mode, HTTP status
//! mapping, and a structured JSON response carrying a machine-readable code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    BadRequest,
    MissingField,
    InvalidFormat,

    // Resource errors (4xxx)
    NotFound,

    // Database / backend errors (7xxx)
    BackendError,
    DatabaseConnection,
    DbTimeout,

    // External / model errors (8xxx)
    EmbeddingError,
    LlmUnavailable,

    // Internal / overload errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    Overloaded,
    Timeout,
}

impl ErrorCode {
    /// Numeric code for this error, grouped by category.
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::BadRequest => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,

            ErrorCode::NotFound => 4001,

            ErrorCode::BackendError => 7001,
            ErrorCode::DatabaseConnection => 7002,
            ErrorCode::DbTimeout => 7003,

            ErrorCode::EmbeddingError => 8001,
            ErrorCode::LlmUnavailable => 8002,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::Overloaded => 9004,
            ErrorCode::Timeout => 9005,
        }
    }
}

/// Application error kinds.
///
/// `ParseBenign` is deliberately absent as a constructible variant: the
/// query parser never fails, so there is nothing to represent here beyond
/// the doc comment recording that the kind exists in the design vocabulary.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    /// Similar-by-id retrieval whose source request id does not exist.
    #[error("Request not found: {request_id}")]
    NotFound { request_id: String },

    /// DB unreachable or a search/count query failed. `kind` records which
    /// SQL statement failed.
    #[error("Backend error ({kind}): {message}")]
    BackendError { kind: SqlKind, message: String },

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    /// The total deadline fired while still inside the SQL retrieval path
    /// (the only way `/search` can time out, since it never reaches the
    /// LLM). Distinct from `Timeout`, which covers the LLM-involving
    /// `/rag` path and degrades to a 200 rather than failing the request.
    #[error("Database operation timed out after {elapsed_ms}ms")]
    DbTimeout { elapsed_ms: u64 },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    /// The LLM gateway failed to load its model, or is in its terminal
    /// unavailable state. `/rag` degrades to retrieval-only on this error.
    #[error("LLM unavailable: {message}")]
    LlmUnavailable { message: String },

    /// The LLM gateway's bounded request queue was full.
    #[error("LLM queue overloaded")]
    Overloaded,

    /// Total or generate-only deadline exceeded.
    #[error("Operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Which SQL statement a backend failure originated from, carried so the
/// orchestrator and logs can tell count-path failures from search-path
/// failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SqlKind {
    Count,
    Search,
    Lookup,
}

impl std::fmt::Display for SqlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlKind::Count => write!(f, "count"),
            SqlKind::Search => write!(f, "search"),
            SqlKind::Lookup => write!(f, "lookup"),
        }
    }
}

impl AppError {
    /// Machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::BadRequest { .. } => ErrorCode::BadRequest,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::BackendError { .. } => ErrorCode::BackendError,
            AppError::DatabaseConnection { .. } => ErrorCode::DatabaseConnection,
            AppError::DbTimeout { .. } => ErrorCode::DbTimeout,
            AppError::Database(_) => ErrorCode::BackendError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::LlmUnavailable { .. } => ErrorCode::LlmUnavailable,
            AppError::Overloaded => ErrorCode::Overloaded,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// HTTP status code for this error.
    ///
    /// `NotFound`, `LlmUnavailable` and `Timeout` map to 200 here because
    /// the handlers that can reach them convert them into a successful
    /// degraded payload rather than propagating the error response; this
    /// mapping only applies when an error escapes a handler directly (e.g.
    /// a `BadRequest` from request validation).
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            AppError::NotFound { .. } => StatusCode::OK,

            AppError::BackendError { .. }
            | AppError::DatabaseConnection { .. }
            | AppError::Database(_) => StatusCode::BAD_GATEWAY,

            AppError::DbTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            AppError::EmbeddingError { .. } => StatusCode::BAD_GATEWAY,

            AppError::LlmUnavailable { .. } => StatusCode::OK,

            AppError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,

            AppError::Timeout { .. } => StatusCode::OK,

            AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(error = %message, code = ?code, status = status.as_u16(), "server error");
        } else {
            tracing::warn!(error = %message, code = ?code, status = status.as_u16(), "request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
                request_id: None, // filled by request-id middleware in the gateway
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::NotFound {
            request_id: "211000001".into(),
        };
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.status_code(), StatusCode::OK);
    }

    #[test]
    fn test_bad_request_is_client_error() {
        let err = AppError::BadRequest {
            message: "missing query".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
    }

    #[test]
    fn test_backend_error_is_server_error() {
        let err = AppError::BackendError {
            kind: SqlKind::Count,
            message: "connection reset".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.is_server_error());
    }

    #[test]
    fn test_overloaded_maps_to_503() {
        let err = AppError::Overloaded;
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_db_timeout_maps_to_504() {
        let err = AppError::DbTimeout { elapsed_ms: 5000 };
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.code(), ErrorCode::DbTimeout);
        assert!(err.is_server_error());
    }
}
