use http::StatusCode;
use sea_orm::error::{DbErr, SqlErr};
use serde::Serialize;

use crate::entities::invoice::InvoiceStatus;

/// Errors surfaced by the billing core.
///
/// Every operation runs inside one database transaction; returning any of
/// these drops the transaction uncommitted, so no partial state survives.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: InvoiceStatus, to: InvoiceStatus },

    #[error("Overpay: attempted {attempted_cents} with {remaining_cents} remaining")]
    Overpay {
        attempted_cents: i64,
        remaining_cents: i64,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

/// Driver messages that mean "another transaction holds what you need".
const CONTENTION_MARKERS: [&str; 6] = [
    "could not obtain lock",
    "lock timeout",
    "deadlock detected",
    "could not serialize access",
    "database is locked",
    "canceling statement due to lock timeout",
];

impl ServiceError {
    /// Normalizes a database error, mapping contention and uniqueness races to
    /// [`ServiceError::Conflict`].
    pub fn db_error(error: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(detail)) = error.sql_err() {
            return ServiceError::Conflict(detail);
        }

        let message = error.to_string().to_ascii_lowercase();
        if CONTENTION_MARKERS.iter().any(|marker| message.contains(marker)) {
            return ServiceError::Conflict(error.to_string());
        }

        ServiceError::DatabaseError(error)
    }

    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} {} not found", kind, id))
    }

    /// Conflicts are resolved by retrying the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Status code a request handler should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. } | Self::InvalidOperation(_) => StatusCode::CONFLICT,
            Self::Overpay { .. } | Self::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Overpay { .. } => "overpay",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::Conflict(_) => "conflict",
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }
}

pub type AppError = ServiceError;
