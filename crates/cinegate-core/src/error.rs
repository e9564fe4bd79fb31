//! Gateway error taxonomy.
//!
//! Every terminal per-request decision the gateway can make is a variant of
//! [`GatewayError`]. Each variant has an internal [`kind`](GatewayError::kind)
//! used in logs and an [`ErrorCategory`] that decides the HTTP status.
//!
//! The three credential failures share one category, one public code and one
//! public message, so callers cannot tell a malformed header from an unknown
//! or expired token. Logs keep the precise kind.
//!
//! | Variant | Category | Status |
//! |---|---|---|
//! | `RateLimited` | `RateLimited` | 429 |
//! | `MalformedCredential`, `InvalidCredential`, `ExpiredCredential`, `AuthenticationRequired` | `Authentication` | 401 |
//! | `InactiveAccount`, `InsufficientPermission` | `Authorization` | 403 |
//! | `UpstreamTimeout` | `Unavailable` | 503 |
//! | `Store`, `HandlerPanic`, `DrainTimeout` | `Internal` | 500 |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Result type alias using [`GatewayError`].
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Message shared by every credential failure.
const UNAUTHENTICATED_MESSAGE: &str = "invalid or missing authentication token";

/// Categories of errors for classification and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed request input.
    Validation,
    /// Identity absent or invalid.
    Authentication,
    /// Identity known, insufficient rights.
    Authorization,
    /// No such route or resource.
    NotFound,
    /// Route exists but not for this method.
    MethodNotAllowed,
    /// The request body is over the configured cap.
    PayloadTooLarge,
    /// Client exceeded its admission budget.
    RateLimited,
    /// A dependency did not answer in time.
    Unavailable,
    /// The request as a whole ran out of time.
    Timeout,
    /// Anything else.
    Internal,
}

impl ErrorCategory {
    /// Returns the HTTP status code for this category.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors produced by the gateway.
///
/// # Example
///
/// ```
/// use cinegate_core::{ErrorCategory, GatewayError};
/// use http::StatusCode;
///
/// let malformed = GatewayError::malformed_credential("missing Bearer scheme");
/// let invalid = GatewayError::InvalidCredential;
///
/// assert_eq!(malformed.status_code(), StatusCode::UNAUTHORIZED);
/// assert_eq!(malformed.public_message(), invalid.public_message());
/// assert_ne!(malformed.kind(), invalid.kind());
/// ```
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The client's token bucket is empty.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The `Authorization` header is not `Bearer <token>`.
    #[error("malformed credential: {reason}")]
    MalformedCredential {
        /// What was wrong with the header.
        reason: String,
    },

    /// No active token matches the presented credential.
    #[error("invalid credential")]
    InvalidCredential,

    /// The token exists but has expired.
    #[error("expired credential")]
    ExpiredCredential,

    /// A protected route was called without credentials.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The account behind the credential is not activated.
    #[error("account not activated")]
    InactiveAccount,

    /// The identity lacks the permission code a route requires.
    #[error("missing permission {permission}")]
    InsufficientPermission {
        /// The required code.
        permission: String,
    },

    /// A store call exceeded its deadline.
    #[error("{operation} timed out")]
    UpstreamTimeout {
        /// The store operation that timed out.
        operation: &'static str,
    },

    /// A store call failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A handler panicked; recovered at the barrier.
    #[error("handler panicked: {message}")]
    HandlerPanic {
        /// The panic payload, rendered.
        message: String,
    },

    /// Background tasks did not drain before the shutdown deadline.
    #[error("{remaining} background tasks still running at drain deadline")]
    DrainTimeout {
        /// Tasks still in flight.
        remaining: usize,
    },

    /// No route matches the path.
    #[error("route not found: {path}")]
    NotFound {
        /// The requested path.
        path: String,
    },

    /// The path exists with other methods.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// The request body or parameters are invalid.
    #[error("bad request: {message}")]
    BadRequest {
        /// What is wrong with the input.
        message: String,
    },

    /// The whole request exceeded the server's request timeout.
    #[error("request timed out")]
    RequestTimeout,

    /// The request body is larger than the server accepts.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// The cap, in bytes.
        limit: usize,
    },
}

impl GatewayError {
    /// Creates a malformed credential error.
    #[must_use]
    pub fn malformed_credential(reason: impl Into<String>) -> Self {
        Self::MalformedCredential {
            reason: reason.into(),
        }
    }

    /// Creates an insufficient permission error.
    #[must_use]
    pub fn insufficient_permission(permission: impl Into<String>) -> Self {
        Self::InsufficientPermission {
            permission: permission.into(),
        }
    }

    /// Creates an upstream timeout error.
    #[must_use]
    pub const fn upstream_timeout(operation: &'static str) -> Self {
        Self::UpstreamTimeout { operation }
    }

    /// Creates a handler panic error.
    #[must_use]
    pub fn handler_panic(message: impl Into<String>) -> Self {
        Self::HandlerPanic {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited => ErrorCategory::RateLimited,
            Self::MalformedCredential { .. }
            | Self::InvalidCredential
            | Self::ExpiredCredential
            | Self::AuthenticationRequired => ErrorCategory::Authentication,
            Self::InactiveAccount | Self::InsufficientPermission { .. } => {
                ErrorCategory::Authorization
            }
            Self::UpstreamTimeout { .. } => ErrorCategory::Unavailable,
            Self::Store(_) | Self::HandlerPanic { .. } | Self::DrainTimeout { .. } => {
                ErrorCategory::Internal
            }
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::MethodNotAllowed => ErrorCategory::MethodNotAllowed,
            Self::BadRequest { .. } => ErrorCategory::Validation,
            Self::RequestTimeout => ErrorCategory::Timeout,
            Self::PayloadTooLarge { .. } => ErrorCategory::PayloadTooLarge,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.category().status_code()
    }

    /// Internal kind, for logs only.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::MalformedCredential { .. } => "malformed_credential",
            Self::InvalidCredential => "invalid_credential",
            Self::ExpiredCredential => "expired_credential",
            Self::AuthenticationRequired => "authentication_required",
            Self::InactiveAccount => "inactive_account",
            Self::InsufficientPermission { .. } => "insufficient_permission",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::Store(_) => "store_error",
            Self::HandlerPanic { .. } => "handler_panic",
            Self::DrainTimeout { .. } => "drain_timeout",
            Self::NotFound { .. } => "not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::BadRequest { .. } => "bad_request",
            Self::RequestTimeout => "request_timeout",
            Self::PayloadTooLarge { .. } => "payload_too_large",
        }
    }

    /// Machine-readable code exposed to callers.
    #[must_use]
    pub const fn public_code(&self) -> &'static str {
        match self {
            Self::RateLimited => "RATE_LIMITED",
            Self::MalformedCredential { .. }
            | Self::InvalidCredential
            | Self::ExpiredCredential
            | Self::AuthenticationRequired => "UNAUTHENTICATED",
            Self::InactiveAccount => "INACTIVE_ACCOUNT",
            Self::InsufficientPermission { .. } => "FORBIDDEN",
            Self::UpstreamTimeout { .. } => "SERVICE_UNAVAILABLE",
            Self::Store(_) | Self::HandlerPanic { .. } | Self::DrainTimeout { .. } => {
                "INTERNAL_ERROR"
            }
            Self::NotFound { .. } => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::RequestTimeout => "TIMEOUT",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
        }
    }

    /// Human-readable message exposed to callers.
    ///
    /// Never includes store details, panic payloads or credential specifics.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::RateLimited => "rate limit exceeded".to_string(),
            Self::MalformedCredential { .. } | Self::InvalidCredential | Self::ExpiredCredential => {
                UNAUTHENTICATED_MESSAGE.to_string()
            }
            Self::AuthenticationRequired => {
                "you must be authenticated to access this resource".to_string()
            }
            Self::InactiveAccount => {
                "your user account must be activated to access this resource".to_string()
            }
            Self::InsufficientPermission { .. } => {
                "your user account doesn't have the necessary permissions to access this resource"
                    .to_string()
            }
            Self::UpstreamTimeout { .. } => {
                "the server could not verify your identity in time, please retry".to_string()
            }
            Self::Store(_) | Self::HandlerPanic { .. } | Self::DrainTimeout { .. } => {
                "the server encountered a problem and could not process your request".to_string()
            }
            Self::NotFound { .. } => "the requested resource could not be found".to_string(),
            Self::MethodNotAllowed => {
                "the method is not supported for this resource".to_string()
            }
            Self::BadRequest { message } => message.clone(),
            Self::RequestTimeout => "the request took too long to process".to_string(),
            Self::PayloadTooLarge { limit } => {
                format!("the request body must not be larger than {limit} bytes")
            }
        }
    }

    /// Returns `true` for failures that must carry a `WWW-Authenticate` challenge.
    #[must_use]
    pub const fn is_unauthenticated(&self) -> bool {
        matches!(self.category(), ErrorCategory::Authentication)
    }

    /// Converts this error to its serializable envelope.
    #[must_use]
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorDetail {
                code: self.public_code().to_string(),
                message: self.public_message(),
            },
        }
    }
}

/// JSON error body: `{"error": {"code": .., "message": ..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error detail.
    pub error: ErrorDetail,
}

/// Code and message of an [`ErrorEnvelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(GatewayError::InvalidCredential.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::AuthenticationRequired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            GatewayError::insufficient_permission("movies:write").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(GatewayError::InactiveAccount.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            GatewayError::upstream_timeout("token lookup").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::handler_panic("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(GatewayError::MethodNotAllowed.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_payload_too_large_names_the_limit() {
        let err = GatewayError::PayloadTooLarge { limit: 1024 };
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.public_code(), "PAYLOAD_TOO_LARGE");
        assert_eq!(
            err.public_message(),
            "the request body must not be larger than 1024 bytes"
        );
    }

    #[test]
    fn test_credential_failures_share_public_envelope() {
        let malformed = GatewayError::malformed_credential("scheme is not Bearer");
        let invalid = GatewayError::InvalidCredential;
        let expired = GatewayError::ExpiredCredential;

        assert_eq!(malformed.to_envelope(), invalid.to_envelope());
        assert_eq!(invalid.to_envelope(), expired.to_envelope());

        assert_eq!(malformed.kind(), "malformed_credential");
        assert_eq!(invalid.kind(), "invalid_credential");
        assert_eq!(expired.kind(), "expired_credential");
    }

    #[test]
    fn test_unauthenticated_vs_forbidden_are_distinct() {
        let unauthenticated = GatewayError::AuthenticationRequired;
        let forbidden = GatewayError::insufficient_permission("movies:read");
        assert!(unauthenticated.is_unauthenticated());
        assert!(!forbidden.is_unauthenticated());
        assert_ne!(unauthenticated.public_code(), forbidden.public_code());
    }

    #[test]
    fn test_internal_messages_do_not_leak_details() {
        let err = GatewayError::Store(StoreError::unavailable("pg: connection refused"));
        assert!(!err.public_message().contains("pg"));
        let err = GatewayError::handler_panic("index out of bounds");
        assert!(!err.public_message().contains("index"));
    }

    #[test]
    fn test_envelope_serialization() {
        let json = serde_json::to_value(GatewayError::RateLimited.to_envelope()).unwrap();
        assert_eq!(json["error"]["code"], "RATE_LIMITED");
        assert_eq!(json["error"]["message"], "rate limit exceeded");
    }
}
