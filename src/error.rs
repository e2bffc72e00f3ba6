//! Error types for the database console core.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Every variant is safe to show to the caller: credential values never appear in
//! a message, and authorization failures never reveal whether a resource exists.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Coarse classification of an engine-reported execution error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Syntax,
    Constraint,
    Permission,
    Runtime,
}

impl ExecutionErrorKind {
    /// Classify by SQLSTATE class (first two characters).
    pub fn from_sql_state(sql_state: Option<&str>) -> Self {
        match sql_state.map(|s| s.get(..2).unwrap_or(s)) {
            Some("42") => Self::Syntax,
            Some("23") => Self::Constraint,
            Some("28") | Some("44") => Self::Permission,
            _ => Self::Runtime,
        }
    }
}

impl std::fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax => write!(f, "syntax"),
            Self::Constraint => write!(f, "constraint"),
            Self::Permission => write!(f, "permission"),
            Self::Runtime => write!(f, "runtime"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Not authorized: {reason}")]
    Unauthorized { reason: String },

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("Connection failed: {message}")]
    ConnectFailed { message: String, suggestion: String },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Query failed ({kind}): {message}")]
    SyntaxOrRuntime {
        /// Engine-reported message, passed through verbatim
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        kind: ExecutionErrorKind,
    },

    #[error("Row limit exceeded: result has more than {limit} rows")]
    RowLimitExceeded { limit: usize },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    /// Create an authorization error. The reason must not mention whether the target exists.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connect_failed(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConnectFailed {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an execution error, classifying it from its SQLSTATE.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        let kind = ExecutionErrorKind::from_sql_state(sql_state.as_deref());
        Self::SyntaxOrRuntime {
            message: message.into(),
            sql_state,
            kind,
        }
    }

    /// Create a row limit error (strict mode only).
    pub fn row_limit_exceeded(limit: usize) -> Self {
        Self::RowLimitExceeded { limit }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectFailed { suggestion, .. } => Some(suggestion),
            Self::Timeout { .. } => {
                Some("Consider increasing the timeout or optimizing the operation")
            }
            _ => None,
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "unauthorized",
            Self::NotFound { .. } => "not_found",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::SyntaxOrRuntime { .. } => "syntax_or_runtime",
            Self::RowLimitExceeded { .. } => "row_limit_exceeded",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Internal { .. } => "internal",
        }
    }

    /// HTTP-style status for the routing layer.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::ConnectFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::SyntaxOrRuntime { .. } => StatusCode::BAD_REQUEST,
            Self::RowLimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error leaves the underlying live connection unusable.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. } | Self::Timeout { .. } | Self::Cancelled { .. }
        )
    }
}

/// Convert sqlx errors to CoreError.
impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => CoreError::connect_failed(
                msg.to_string(),
                "Check the connection settings and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                CoreError::execution(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => CoreError::execution("No rows returned", None),
            sqlx::Error::PoolTimedOut => {
                CoreError::timeout("store pool acquire", std::time::Duration::from_secs(30))
            }
            sqlx::Error::PoolClosed => {
                CoreError::connect_failed("Connection is closed", "Retry the operation")
            }
            sqlx::Error::Io(io_err) => CoreError::connect_failed(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => CoreError::connect_failed(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => CoreError::connect_failed(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                CoreError::execution(format!("Type not found: {}", type_name), None)
            }
            sqlx::Error::ColumnNotFound(col) => {
                CoreError::execution(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => CoreError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                CoreError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => CoreError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => CoreError::internal("Database worker crashed"),
            _ => CoreError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ExecutionErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sql_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (kind, sql_state) = match &self {
            CoreError::SyntaxOrRuntime {
                kind, sql_state, ..
            } => (Some(*kind), sql_state.clone()),
            _ => (None, None),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
                kind,
                sql_state,
                suggestion: self.suggestion().map(String::from),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::connect_failed("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_execution_error_classification() {
        let err = CoreError::execution("syntax error at or near \"SELEC\"", Some("42601".into()));
        assert!(matches!(
            err,
            CoreError::SyntaxOrRuntime {
                kind: ExecutionErrorKind::Syntax,
                ..
            }
        ));

        let err = CoreError::execution("duplicate key", Some("23505".into()));
        assert!(matches!(
            err,
            CoreError::SyntaxOrRuntime {
                kind: ExecutionErrorKind::Constraint,
                ..
            }
        ));

        let err = CoreError::execution("division by zero", None);
        assert!(matches!(
            err,
            CoreError::SyntaxOrRuntime {
                kind: ExecutionErrorKind::Runtime,
                ..
            }
        ));
    }

    #[test]
    fn test_engine_message_passed_through() {
        let err = CoreError::execution("relation \"nope\" does not exist", Some("42P01".into()));
        assert!(err.to_string().contains("relation \"nope\" does not exist"));
    }

    #[test]
    fn test_breaks_connection() {
        assert!(CoreError::timeout("query", std::time::Duration::from_secs(1)).breaks_connection());
        assert!(CoreError::connect_failed("err", "sugg").breaks_connection());
        assert!(!CoreError::execution("bad", None).breaks_connection());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            CoreError::unauthorized("no").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            CoreError::not_found("query", "q1").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CoreError::connect_failed("x", "y").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            CoreError::timeout("q", std::time::Duration::from_secs(30)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_into_response_status() {
        let response = CoreError::invalid_input("bad").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
