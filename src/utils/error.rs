use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Lock conflict: {0}")]
    LockConflict(String),

    #[error("Payment incomplete: {0}")]
    PaymentIncomplete(String),

    #[error("Fiscal numbering failure: {0}")]
    FiscalNumbering(String),

    #[error("Order already completed: {0}")]
    AlreadyCompleted(String),

    #[error("Order already voided: {0}")]
    AlreadyVoided(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::CapacityExceeded(_) => StatusCode::CONFLICT,
            AppError::LockConflict(_) => StatusCode::CONFLICT,
            AppError::PaymentIncomplete(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::FiscalNumbering(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::AlreadyCompleted(_) => StatusCode::CONFLICT,
            AppError::AlreadyVoided(_) => StatusCode::CONFLICT,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            AppError::LockConflict(_) => "LOCK_CONFLICT",
            AppError::PaymentIncomplete(_) => "PAYMENT_INCOMPLETE",
            AppError::FiscalNumbering(_) => "FISCAL_NUMBERING_FAILURE",
            AppError::AlreadyCompleted(_) => "ALREADY_COMPLETED",
            AppError::AlreadyVoided(_) => "ALREADY_VOIDED",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn retryable(&self) -> bool {
        matches!(self, AppError::FiscalNumbering(_))
    }

    fn log(&self) {
        match self {
            // Expected business outcomes under contention, not server faults.
            AppError::CapacityExceeded(msg)
            | AppError::LockConflict(msg)
            | AppError::PaymentIncomplete(msg)
            | AppError::AlreadyCompleted(msg)
            | AppError::AlreadyVoided(msg) => {
                warn!(code = self.code(), message = %msg, "Request rejected");
            }
            AppError::ValidationError(msg)
            | AppError::NotFound(msg)
            | AppError::FiscalNumbering(msg)
            | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::NotFound(msg)
            | AppError::CapacityExceeded(msg)
            | AppError::LockConflict(msg)
            | AppError::PaymentIncomplete(msg)
            | AppError::FiscalNumbering(msg)
            | AppError::AlreadyCompleted(msg)
            | AppError::AlreadyVoided(msg)
            | AppError::InternalServerError(msg) => msg.clone(),
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
        };

        // Do not expose internal details in the API response
        let details = None;

        error_response(code, public_message, details, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_errors_map_to_conflict() {
        assert_eq!(
            AppError::CapacityExceeded("zone full".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::LockConflict("seat held".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::AlreadyCompleted("order done".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn fiscal_failure_is_retryable_service_unavailable() {
        let err = AppError::FiscalNumbering("counter lock timeout".into());
        assert!(err.retryable());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "FISCAL_NUMBERING_FAILURE");
    }

    #[test]
    fn payment_incomplete_is_unprocessable() {
        let err = AppError::PaymentIncomplete("paid 10.00 of 50.00".into());
        assert!(!err.retryable());
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
