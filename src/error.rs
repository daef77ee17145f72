//! Error types for reqlog.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for reqlog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for reqlog.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Storage unavailable at '{location}': {message}")]
    StorageUnavailable { location: String, message: String },

    #[error("Migration failed: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::StorageUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::MigrationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a sqlx error from a create statement, surfacing unique violations as conflicts.
    pub fn from_insert(err: sqlx::Error, what: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(format!("{} already exists", what))
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                Error::Validation(format!("{} references a missing record", what))
            }
            _ => Error::Database(err),
        }
    }
}

/// Error text attached to a response so the instrumentation layer can record it.
#[derive(Debug, Clone)]
pub struct HandlerError(pub String);

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Don't leak driver details to clients; the full text still lands in the log record.
            Error::Database(_) => "Database operation failed".to_string(),
            _ => self.to_string(),
        };

        let body = serde_json::json!({
            "error": {
                "message": message,
                "type": "reqlog_error",
                "code": status.as_u16()
            }
        });

        let mut response = (status, axum::Json(body)).into_response();
        response
            .extensions_mut()
            .insert(HandlerError(self.to_string()));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let response = Error::Validation("limit is required".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let attached = response.extensions().get::<HandlerError>().unwrap();
        assert!(attached.0.contains("limit is required"));
    }

    #[test]
    fn test_database_error_is_server_error() {
        let response = Error::Database(sqlx::Error::PoolTimedOut).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.extensions().get::<HandlerError>().is_some());
    }

    #[test]
    fn test_payload_too_large_status() {
        let err = Error::PayloadTooLarge { limit: 16 };
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.to_string(), "Request body exceeds 16 bytes");
    }
}
