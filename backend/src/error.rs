//! Error handling for the lot pipeline
//!
//! Business failures (`Validation`, `Transition`) carry operator-facing
//! messages in English and Spanish and are never retried. Lock timeouts and
//! connection failures are infrastructure errors: the operation fully rolled
//! back, so the caller may retry it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{TransitionError, ValidationError};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Business errors
    #[error("Validation error: {message}")]
    Validation {
        field: Option<String>,
        message: String,
        message_es: String,
    },

    #[error("Invalid state transition: {message}")]
    Transition { message: String, message_es: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Raised by the ledger; services translate it into a `Validation`
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    // Infrastructure errors
    #[error("Lock wait timed out: {0}")]
    LockTimeout(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] std::io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// True when the failed operation rolled back for reasons unrelated to
    /// its input and may be attempted again
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::LockTimeout(_) => true,
            AppError::DatabaseError(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    /// Business failures are the caller's to fix
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. } | AppError::Transition { .. } | AppError::NotFound(_)
        )
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::Validation {
            field: e.field,
            message: e.message,
            message_es: e.message_es,
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(e: TransitionError) -> Self {
        AppError::Transition {
            message: e.message,
            message_es: e.message_es,
        }
    }
}

/// Request-shape failures reported by `validator` derives; the first field in
/// name order is reported
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .into_keys()
            .min()
            .unwrap_or("request")
            .to_string();
        AppError::Validation {
            message: format!("The value of {} is invalid.", field),
            message_es: format!("El valor de {} no es válido.", field),
            field: Some(field),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message_en: String,
    pub message_es: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match &self {
            AppError::Validation {
                field,
                message,
                message_es,
            } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    code: "VALIDATION_ERROR".to_string(),
                    message_en: message.clone(),
                    message_es: message_es.clone(),
                    field: field.clone(),
                },
            ),
            AppError::Transition {
                message,
                message_es,
            } => (
                StatusCode::CONFLICT,
                ErrorDetail {
                    code: "INVALID_STATE_TRANSITION".to_string(),
                    message_en: message.clone(),
                    message_es: message_es.clone(),
                    field: None,
                },
            ),
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetail {
                    code: "NOT_FOUND".to_string(),
                    message_en: format!("{} not found", resource),
                    message_es: format!("No se encontró {}", resource),
                    field: None,
                },
            ),
            AppError::UniqueViolation(constraint) => (
                StatusCode::CONFLICT,
                ErrorDetail {
                    code: "DUPLICATE_ENTRY".to_string(),
                    message_en: "A record with the same identifier already exists".to_string(),
                    message_es: "Ya existe un registro con el mismo identificador".to_string(),
                    field: Some(constraint.clone()),
                },
            ),
            AppError::LockTimeout(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorDetail {
                    code: "LOCK_TIMEOUT".to_string(),
                    message_en: "The records are busy. Please try again.".to_string(),
                    message_es: "Los registros están ocupados. Intente nuevamente.".to_string(),
                    field: None,
                },
            ),
            AppError::StorageError(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorDetail {
                    code: "STORAGE_ERROR".to_string(),
                    message_en: "A storage error occurred".to_string(),
                    message_es: "Ocurrió un error de almacenamiento".to_string(),
                    field: None,
                },
            ),
            AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    code: "DATABASE_ERROR".to_string(),
                    message_en: "A database error occurred".to_string(),
                    message_es: "Ocurrió un error de base de datos".to_string(),
                    field: None,
                },
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    code: "INTERNAL_ERROR".to_string(),
                    message_en: msg.clone(),
                    message_es: "Error interno del servidor".to_string(),
                    field: None,
                },
            ),
        };

        if self.is_business() {
            tracing::warn!("Rejected: {}", self);
        } else {
            tracing::error!("Error: {:?}", self);
        }

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for services and handlers
pub type AppResult<T> = Result<T, AppError>;
