//! Bot error types with HTTP status code mapping.
//!
//! [`BotError`] is the central error type for the crate. Background loops
//! never treat it as fatal: every variant degrades to "skip this guild,
//! instance or task" plus a log line. The ingestion route maps each
//! variant to a structured JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Structured JSON error response body.
///
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid payload: unknown event `tip`"
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

/// Failure kinds reported by the chat platform collaborator.
///
/// Kept distinct so callers can tell "not connected" from "rate limited"
/// from "permanently forbidden".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// The platform rejected the call because of a rate limit.
    #[error("rate limited; retry after {retry_after_secs} s")]
    RateLimited {
        /// Seconds until the call may be retried.
        retry_after_secs: u64,
    },

    /// The bot lacks the permission required for the call.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The guild, channel, role or member does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport-level failure talking to the platform.
    #[error("network error: {0}")]
    Network(String),
}

/// Crate-wide error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category              | HTTP Status               |
/// |-----------|-----------------------|---------------------------|
/// | 1000–1999 | Validation / config   | 400 Bad Request           |
/// | 2000–2999 | Routing / not found   | 404 / 503                 |
/// | 3000–3999 | Server                | 500 Internal Server Error |
/// | 4000–4999 | Upstream              | 502 / 429 / 403           |
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// The resolved guild or bot identity has no live connection.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// Guild, channel, webhook or record absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Webhook POST returned a non-success status or failed in transit.
    #[error("webhook delivery failed: {0}")]
    DeliveryFailed(String),

    /// Malformed settings value (timezone, amount, colour).
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A task handler failed after its record was consumed.
    #[error("task handler failed: {0}")]
    HandlerFailure(String),

    /// Inbound event payload could not be interpreted.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Chat platform call failed.
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BotError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidPayload(_) => 1001,
            Self::ConfigInvalid(_) => 1002,
            Self::NotFound(_) => 2001,
            Self::NotConnected(_) => 2002,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::HandlerFailure(_) => 3002,
            Self::DeliveryFailed(_) => 4001,
            Self::Platform(PlatformError::RateLimited { .. }) => 4029,
            Self::Platform(PlatformError::Forbidden(_)) => 4003,
            Self::Platform(PlatformError::NotFound(_)) => 4004,
            Self::Platform(PlatformError::Network(_)) => 4002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPayload(_) | Self::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::Platform(PlatformError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            Self::NotConnected(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Platform(PlatformError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            Self::Platform(PlatformError::Forbidden(_)) => StatusCode::FORBIDDEN,
            Self::DeliveryFailed(_) | Self::Platform(PlatformError::Network(_)) => {
                StatusCode::BAD_GATEWAY
            }
            Self::PersistenceError(_) | Self::HandlerFailure(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns `true` for failures that mean "this guild or instance cannot
    /// be reached right now" and should be skipped rather than reported.
    #[must_use]
    pub const fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected(_) | Self::NotFound(_) | Self::Platform(_)
        )
    }
}

impl From<sqlx::Error> for BotError {
    fn from(err: sqlx::Error) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

impl IntoResponse for BotError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_errors_keep_their_kind() {
        let limited = BotError::from(PlatformError::RateLimited {
            retry_after_secs: 30,
        });
        assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.error_code(), 4029);

        let forbidden = BotError::from(PlatformError::Forbidden("manage roles".into()));
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn routing_failures_are_skippable() {
        assert!(BotError::NotConnected("guild 1".into()).is_skippable());
        assert!(BotError::NotFound("channel".into()).is_skippable());
        assert!(!BotError::DeliveryFailed("status 404".into()).is_skippable());
        assert!(!BotError::PersistenceError("down".into()).is_skippable());
    }

    #[test]
    fn into_response_sets_status() {
        let response = BotError::InvalidPayload("missing coinKind".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
