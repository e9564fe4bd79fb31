//! Common types used throughout the middleware pipeline.
//!
//! This module re-exports HTTP request and response types used by middleware.

use bytes::Bytes;
use cinegate_core::GatewayError;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;
use serde::Serialize;

/// The HTTP request type used in the middleware pipeline.
///
/// This is a standard `http::Request` with a `Full<Bytes>` body.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware pipeline.
///
/// This is a standard `http::Response` with a `Full<Bytes>` body.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building gateway responses.
pub trait ResponseExt {
    /// Creates a response with no body.
    fn empty(status: StatusCode) -> Response;

    /// Creates a JSON response from any serializable body.
    ///
    /// A body that fails to serialize is logged and answered with a 500.
    fn json<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Response;

    /// Creates a JSON error envelope response.
    fn json_error(status: StatusCode, code: &str, message: &str) -> Response;

    /// Renders a [`GatewayError`] as the response the caller sees.
    ///
    /// Rate limiting answers with an empty body, authentication failures
    /// carry a `WWW-Authenticate: Bearer` challenge, everything else gets the
    /// JSON envelope.
    fn from_gateway_error(error: &GatewayError) -> Response;
}

impl ResponseExt for Response {
    fn empty(status: StatusCode) -> Response {
        http::Response::builder()
            .status(status)
            .body(Full::new(Bytes::new()))
            .expect("failed to build empty response")
    }

    fn json<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Response {
        match serde_json::to_vec(body) {
            Ok(bytes) => http::Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from(bytes)))
                .expect("failed to build JSON response"),
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize response body");
                Self::json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "the server encountered a problem and could not process your request",
                )
            }
        }
    }

    fn json_error(status: StatusCode, code: &str, message: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message
            }
        });

        http::Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .expect("failed to build JSON error response")
    }

    fn from_gateway_error(error: &GatewayError) -> Response {
        if matches!(error, GatewayError::RateLimited) {
            return Self::empty(error.status_code());
        }

        let mut response = Self::json(error.status_code(), &error.to_envelope());
        if error.is_unauthenticated() {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_bytes(response: Response) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_rate_limited_has_empty_body() {
        let response = Response::from_gateway_error(&GatewayError::RateLimited);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_unauthenticated_carries_challenge() {
        let response = Response::from_gateway_error(&GatewayError::InvalidCredential);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
    }

    #[test]
    fn test_forbidden_has_no_challenge() {
        let response =
            Response::from_gateway_error(&GatewayError::insufficient_permission("movies:write"));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_json_response() {
        let response = Response::json(StatusCode::CREATED, &serde_json::json!({"id": 1}));
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_bytes(response).await, Bytes::from_static(br#"{"id":1}"#));
    }
}
