use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Infrastructure-level errors surfaced to HTTP callers.
///
/// Domain outcomes (invalid code, quota exceeded, ...) are not errors; they
/// travel as [`Denial`] values inside tagged results so callers can always
/// tell *why* a request was refused.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => {
                // Never leak internals to the caller
                tracing::error!("internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Internal(format!("Database error: {}", err))
    }
}

impl From<r2d2::Error> for AppError {
    fn from(err: r2d2::Error) -> Self {
        AppError::Internal(format!("Connection pool error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {}", err))
    }
}

/// Why a verification, activation, or registration request was refused.
///
/// Every variant has a stable wire code; the HTTP layer maps these onto
/// status codes, and audit entries record the same codes for statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// Code failed normalization before any I/O was attempted.
    InvalidFormat(String),
    /// No matching record locally and the marketplace does not know the code.
    NotFound,
    /// Code is valid but bound to a different product than requested.
    WrongProduct,
    LicenseInactive,
    LicenseSuspended,
    LicenseExpired,
    /// Domain activation requested but no slots remain.
    QuotaExceeded,
    /// The marketplace timed out or answered garbage; validity is unknown,
    /// not negative.
    Unverifiable(String),
    /// A duplicate registration exists with conflicting bindings.
    Conflict(String),
    ProductNotFound,
    OutOfStock,
    /// Failed-attempt budget for this code is exhausted.
    TooManyAttempts,
}

impl Denial {
    pub fn code(&self) -> &'static str {
        match self {
            Denial::InvalidFormat(_) => "invalid_format",
            Denial::NotFound => "not_found",
            Denial::WrongProduct => "wrong_product",
            Denial::LicenseInactive => "license_inactive",
            Denial::LicenseSuspended => "license_suspended",
            Denial::LicenseExpired => "license_expired",
            Denial::QuotaExceeded => "quota_exceeded",
            Denial::Unverifiable(_) => "unverifiable",
            Denial::Conflict(_) => "conflict",
            Denial::ProductNotFound => "product_not_found",
            Denial::OutOfStock => "out_of_stock",
            Denial::TooManyAttempts => "too_many_attempts",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Denial::InvalidFormat(detail) => format!("Invalid code format: {}", detail),
            Denial::NotFound => "License or purchase code not found".to_string(),
            Denial::WrongProduct => "Code is bound to a different product".to_string(),
            Denial::LicenseInactive => "License is inactive".to_string(),
            Denial::LicenseSuspended => "License is suspended".to_string(),
            Denial::LicenseExpired => "License has expired".to_string(),
            Denial::QuotaExceeded => "Domain activation limit reached".to_string(),
            Denial::Unverifiable(detail) => {
                format!("Could not verify with the marketplace: {}", detail)
            }
            Denial::Conflict(detail) => detail.clone(),
            Denial::ProductNotFound => "Product not found".to_string(),
            Denial::OutOfStock => "Product is out of stock".to_string(),
            Denial::TooManyAttempts => "Too many failed attempts for this code".to_string(),
        }
    }

    /// HTTP status for handlers that surface denials as error responses.
    pub fn status(&self) -> StatusCode {
        match self {
            Denial::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            Denial::NotFound | Denial::ProductNotFound => StatusCode::NOT_FOUND,
            Denial::WrongProduct
            | Denial::LicenseInactive
            | Denial::LicenseSuspended
            | Denial::LicenseExpired
            | Denial::QuotaExceeded
            | Denial::TooManyAttempts => StatusCode::FORBIDDEN,
            Denial::Unverifiable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Denial::Conflict(_) | Denial::OutOfStock => StatusCode::CONFLICT,
        }
    }
}
