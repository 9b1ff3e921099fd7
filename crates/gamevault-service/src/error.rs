//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gamevault_core::{CurrencyType, EconomyError};
use serde::Serialize;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The gateway did not confirm the payment.
    #[error("payment verification failed: {0}")]
    PaymentFailed(String),

    /// Conflict - already owned, already processed or invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient balance.
    #[error("insufficient {currency} balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Currency being spent.
        currency: CurrencyType,
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Too many purchase attempts.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Allowed attempts per window.
        max_attempts: usize,
        /// Window length in seconds.
        window_secs: u64,
    },

    /// Row lock contention; the client may retry.
    #[error("service busy: {0}")]
    Busy(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::PaymentFailed(msg) => (
                StatusCode::BAD_REQUEST,
                "payment_verification_failed",
                msg.clone(),
                None,
            ),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientBalance {
                currency,
                balance,
                required,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_balance",
                self.to_string(),
                Some(serde_json::json!({
                    "currency": currency,
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::RateLimited {
                max_attempts,
                window_secs,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                format!("Too many attempts, at most {max_attempts} per {window_secs}s"),
                Some(serde_json::json!({
                    "max_attempts": max_attempts,
                    "window_secs": window_secs
                })),
            ),
            Self::Busy(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_busy",
                msg.clone(),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<EconomyError> for ApiError {
    fn from(err: EconomyError) -> Self {
        match err {
            EconomyError::InvalidAmount(_)
            | EconomyError::InvalidInput(_)
            | EconomyError::InvalidId(_) => Self::BadRequest(err.to_string()),
            EconomyError::PaymentVerificationFailed(msg) => Self::PaymentFailed(msg),
            EconomyError::InsufficientBalance {
                currency,
                balance,
                required,
            } => Self::InsufficientBalance {
                currency,
                balance,
                required,
            },
            EconomyError::NotFound { .. } => Self::NotFound(err.to_string()),
            EconomyError::AlreadyOwned { .. }
            | EconomyError::InsufficientQuantity { .. }
            | EconomyError::InvalidState(_)
            | EconomyError::DuplicateIdempotencyKey { .. } => Self::Conflict(err.to_string()),
            EconomyError::RateLimitExceeded {
                max_attempts,
                window_secs,
            } => Self::RateLimited {
                max_attempts,
                window_secs,
            },
            EconomyError::Gateway(msg) => Self::ExternalService(msg),
            EconomyError::LockTimeout => Self::Busy(err.to_string()),
            EconomyError::Storage(msg) => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: EconomyError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn economy_errors_map_to_statuses() {
        assert_eq!(
            status_of(EconomyError::InvalidAmount("zero".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(EconomyError::InsufficientBalance {
                currency: CurrencyType::Coins,
                balance: 1,
                required: 2,
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(EconomyError::not_found("purchase", "p1")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(EconomyError::AlreadyOwned {
                item_id: "dragon_skin".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(EconomyError::RateLimitExceeded {
                max_attempts: 5,
                window_secs: 60
            }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(EconomyError::Gateway("down".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(EconomyError::LockTimeout),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(EconomyError::Storage("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
