//! Application error type.
//!
//! Handlers return [`AppResult`]. Gateway errors pass through to the shared
//! envelope; validation failures, edit conflicts and failed logins are
//! API-level answers the gateway taxonomy does not cover.

use std::collections::BTreeMap;

use cinegate_core::{GatewayError, GatewayResult, StoreError};
use cinegate_middleware::{Response, ResponseExt};
use cinegate_tasks::TaskError;
use http::{header, HeaderValue, StatusCode};
use thiserror::Error;

/// Result alias for application handlers.
pub type AppResult<T> = Result<T, AppError>;

/// Errors raised by application handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// A gateway-level failure, rendered with its own status.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// One or more input fields failed validation.
    #[error("validation failed for {} field(s)", .0.len())]
    Validation(BTreeMap<String, String>),

    /// The record changed between read and write.
    #[error("edit conflict")]
    EditConflict,

    /// Background work could not be scheduled because shutdown has begun.
    #[error("background work rejected: {0}")]
    Unavailable(#[from] TaskError),

    /// Login with an unknown e-mail address or a wrong password.
    #[error("invalid authentication credentials")]
    InvalidCredentials,

    /// Something failed that the client cannot fix. Logged, never echoed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::Gateway(GatewayError::Store(err))
    }
}

impl AppError {
    /// Creates a validation failure for a single field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(BTreeMap::from([(field.into(), message.into())]))
    }

    /// Converts the error into what the handler registry expects.
    pub fn into_gateway_result(self) -> GatewayResult<Response> {
        match self {
            Self::Gateway(err) => Err(err),
            Self::Validation(fields) => Ok(Response::json(
                StatusCode::UNPROCESSABLE_ENTITY,
                &serde_json::json!({
                    "error": {
                        "code": "VALIDATION_FAILED",
                        "message": "the request failed validation",
                        "fields": fields,
                    }
                }),
            )),
            Self::EditConflict => Ok(Response::json_error(
                StatusCode::CONFLICT,
                "EDIT_CONFLICT",
                "unable to update the record due to an edit conflict, please try again",
            )),
            Self::Unavailable(err) => {
                tracing::warn!(error = %err, "rejecting request during shutdown");
                Ok(Response::json_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "the server is shutting down, please retry later",
                ))
            }
            Self::InvalidCredentials => {
                let mut response = Response::json_error(
                    StatusCode::UNAUTHORIZED,
                    "INVALID_CREDENTIALS",
                    "invalid authentication credentials",
                );
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                Ok(response)
            }
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                Ok(Response::json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "the server encountered a problem and could not process your request",
                ))
            }
        }
    }
}
