//! Error handling for the Retail Operations Platform
//!
//! Every failure maps to a stable machine-readable code; an operation either
//! fully succeeds or reports one of these kinds.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use shared::{InsufficientStock, ReceiptPlanError, ResolveError, ScanError};

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication / tenancy errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // Business logic errors
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStockLevel(String),

    #[error("Ambiguous scan: {0}")]
    ScanAmbiguous(String),

    #[error("Pack not allowed: {0}")]
    PackNotAllowed(String),

    #[error("Plan limit exceeded: {0}")]
    PlanLimitExceeded(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// The stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DuplicateEntry(_) => "DUPLICATE_ENTRY",
            AppError::Conflict(_) => "CONFLICT",
            AppError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            AppError::InsufficientStockLevel(_) => "INSUFFICIENT_STOCK",
            AppError::ScanAmbiguous(_) => "SCAN_AMBIGUOUS",
            AppError::PackNotAllowed(_) => "PACK_NOT_ALLOWED",
            AppError::PlanLimitExceeded(_) => "PLAN_LIMIT_EXCEEDED",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_)
            | AppError::PackNotAllowed(_)
            | AppError::PlanLimitExceeded(_) => StatusCode::FORBIDDEN,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateEntry(_)
            | AppError::Conflict(_)
            | AppError::InvalidStateTransition(_)
            | AppError::InsufficientStockLevel(_)
            | AppError::ScanAmbiguous(_) => StatusCode::CONFLICT,
            AppError::DatabaseError(_) | AppError::Internal(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Map a unique-constraint violation to a typed conflict; anything else
    /// stays a database error.
    pub fn from_insert_error(err: sqlx::Error, entity: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return AppError::DuplicateEntry(entity.to_string());
            }
        }
        AppError::DatabaseError(err)
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::PackMismatch => AppError::NotFound("Pack".to_string()),
            ResolveError::PackNotAllowed(mode) => {
                AppError::PackNotAllowed(format!("pack is disabled for {mode} operations"))
            }
            ResolveError::UnitMismatch => AppError::validation(
                "unit_id",
                "unit does not match the product's base unit",
            ),
            ResolveError::InvalidQuantity => AppError::validation(
                "quantity",
                "quantity does not resolve to a whole base-unit amount",
            ),
        }
    }
}

impl From<InsufficientStock> for AppError {
    fn from(err: InsufficientStock) -> Self {
        AppError::InsufficientStockLevel(format!(
            "operation would leave on-hand at {}",
            err.next_on_hand
        ))
    }
}

impl From<ReceiptPlanError> for AppError {
    fn from(err: ReceiptPlanError) -> Self {
        match err {
            ReceiptPlanError::UnknownLine(id) => {
                AppError::NotFound(format!("Purchase order line {id}"))
            }
            ReceiptPlanError::OverReceive { .. } => AppError::Conflict(err.to_string()),
            ReceiptPlanError::NonPositiveQuantity => {
                AppError::validation("quantity", "receive quantity must be positive")
            }
            ReceiptPlanError::NothingToReceive => {
                AppError::validation("lines", "nothing left to receive")
            }
        }
    }
}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::NotFound => AppError::NotFound("Scanned product".to_string()),
            ScanError::Ambiguous(_) => AppError::ScanAmbiguous(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_default();
        AppError::Validation {
            message: format!("invalid value for {field}"),
            field,
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
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let field = match &self {
            AppError::Validation { field, .. } => Some(field.clone()),
            _ => None,
        };
        let message = match &self {
            // Never leak driver-level details to callers.
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalError(_) => "An internal server error occurred".to_string(),
            other => other.to_string(),
        };

        // Log the error for debugging
        tracing::error!("Error: {:?}", self);

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
                field,
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_stable_codes() {
        assert_eq!(AppError::NotFound("Store".into()).code(), "NOT_FOUND");
        assert_eq!(
            AppError::InvalidStateTransition("draft -> received".into()).code(),
            "INVALID_STATE_TRANSITION"
        );
        assert_eq!(
            AppError::InsufficientStockLevel("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::PlanLimitExceeded("purchase orders".into()).status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn resolve_errors_keep_their_kind() {
        assert_eq!(AppError::from(ResolveError::UnitMismatch).code(), "VALIDATION_ERROR");
        assert_eq!(AppError::from(ResolveError::PackMismatch).code(), "NOT_FOUND");
        assert_eq!(
            AppError::from(ResolveError::PackNotAllowed("receiving")).code(),
            "PACK_NOT_ALLOWED"
        );
    }

    #[test]
    fn over_receive_is_a_conflict() {
        let err = AppError::from(ReceiptPlanError::OverReceive {
            line_id: uuid::Uuid::new_v4(),
            requested: 70,
            remaining: 60,
        });
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
