use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database read error: {0}")]
    StoreRead(#[source] sqlx::Error),

    #[error("Bus error: {0}")]
    Bus(#[from] redis::RedisError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Content not found with ID: {0}")]
    ContentNotFound(i64),

    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable error kind reported to callers and written to logs
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DURABLE_WRITE_FAILED",
            AppError::StoreRead(_) => "STORE_READ_FAILED",
            AppError::Bus(_) | AppError::Publish(_) => "PUBLISH_FAILED",
            AppError::InvalidInput(_) => "INVALID_ARGUMENT",
            AppError::ContentNotFound(_) => "CONTENT_NOT_FOUND",
            AppError::CatalogUnavailable(_) => "CATALOG_UNAVAILABLE",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::MalformedMessage(_) => "CONSUMER_PROCESSING_FAILED",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether redelivering the message that caused this error can never succeed
    pub fn is_poison(&self) -> bool {
        matches!(self, AppError::MalformedMessage(_))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::ContentNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::CatalogUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Bus(_) | AppError::Publish(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_)
            | AppError::StoreRead(_)
            | AppError::MalformedMessage(_)
            | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_match_error_policy() {
        assert_eq!(
            AppError::InvalidInput("score".into()).kind(),
            "INVALID_ARGUMENT"
        );
        assert_eq!(AppError::ContentNotFound(7).kind(), "CONTENT_NOT_FOUND");
        assert_eq!(
            AppError::CatalogUnavailable("timeout".into()).kind(),
            "CATALOG_UNAVAILABLE"
        );
        assert_eq!(
            AppError::Database(sqlx::Error::PoolTimedOut).kind(),
            "DURABLE_WRITE_FAILED"
        );
        assert_eq!(AppError::Publish("down".into()).kind(), "PUBLISH_FAILED");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::InvalidInput("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::ContentNotFound(1).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::CatalogUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Database(sqlx::Error::PoolClosed).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_reads_and_writes_report_distinct_kinds() {
        let read = AppError::StoreRead(sqlx::Error::PoolTimedOut);
        assert_eq!(read.kind(), "STORE_READ_FAILED");
        assert_eq!(read.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!read.is_poison());
        assert_ne!(
            read.kind(),
            AppError::Database(sqlx::Error::PoolTimedOut).kind()
        );
    }

    #[test]
    fn test_only_malformed_messages_are_poison() {
        assert!(AppError::MalformedMessage("bad json".into()).is_poison());
        assert!(!AppError::Database(sqlx::Error::PoolTimedOut).is_poison());
        assert!(!AppError::Internal("x".into()).is_poison());
    }
}
