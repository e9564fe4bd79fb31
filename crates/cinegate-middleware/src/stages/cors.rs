//! CORS stage.
//!
//! Responses always vary on `Origin` and `Access-Control-Request-Method`.
//! An `Origin` that exactly matches a trusted origin is echoed back in
//! `Access-Control-Allow-Origin`; a preflight from a trusted origin is
//! answered here with 200 and never reaches the rest of the pipeline.
//! Untrusted origins get no CORS headers and are otherwise served normally.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::pipeline::Stage;
use crate::types::{Request, Response, ResponseExt};
use http::{header, HeaderValue, Method, StatusCode};

/// Methods advertised in preflight answers.
pub const PREFLIGHT_ALLOW_METHODS: &str = "OPTIONS, PUT, PATCH, DELETE";

/// Headers advertised in preflight answers.
pub const PREFLIGHT_ALLOW_HEADERS: &str = "Authorization, Content-Type";

/// CORS middleware with an exact-match trusted origin list.
#[derive(Debug, Clone, Default)]
pub struct CorsMiddleware {
    trusted_origins: Vec<String>,
}

impl CorsMiddleware {
    /// Creates the stage from a list of trusted origins.
    #[must_use]
    pub fn new<I, S>(trusted_origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trusted_origins: trusted_origins.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` if `origin` is in the trusted list.
    #[must_use]
    pub fn is_trusted(&self, origin: &str) -> bool {
        self.trusted_origins.iter().any(|trusted| trusted == origin)
    }

    fn trusted_origin(&self, request: &Request) -> Option<HeaderValue> {
        let origin = request.headers().get(header::ORIGIN)?;
        let trusted = origin.to_str().ok().is_some_and(|o| self.is_trusted(o));
        trusted.then(|| origin.clone())
    }
}

fn is_preflight(request: &Request) -> bool {
    request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

fn add_vary(response: &mut Response) {
    let headers = response.headers_mut();
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
    headers.append(
        header::VARY,
        HeaderValue::from_static("Access-Control-Request-Method"),
    );
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        Stage::Cors.name()
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let origin = self.trusted_origin(&request);

            let mut response = match &origin {
                Some(_) if is_preflight(&request) => {
                    let mut preflight = Response::empty(StatusCode::OK);
                    let headers = preflight.headers_mut();
                    headers.insert(
                        header::ACCESS_CONTROL_ALLOW_METHODS,
                        HeaderValue::from_static(PREFLIGHT_ALLOW_METHODS),
                    );
                    headers.insert(
                        header::ACCESS_CONTROL_ALLOW_HEADERS,
                        HeaderValue::from_static(PREFLIGHT_ALLOW_HEADERS),
                    );
                    preflight
                }
                _ => next.run(ctx, request).await,
            };

            add_vary(&mut response);
            if let Some(origin) = origin {
                response
                    .headers_mut()
                    .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Request as HttpRequest;
    use http_body_util::Full;

    const TRUSTED: &str = "https://cinemago.example";

    fn cors() -> CorsMiddleware {
        CorsMiddleware::new([TRUSTED, "http://localhost:9000"])
    }

    fn request(method: Method, origin: Option<&str>, preflight: bool) -> Request {
        let mut builder = HttpRequest::builder().method(method).uri("/v1/movies/1");
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        if preflight {
            builder = builder.header(header::ACCESS_CONTROL_REQUEST_METHOD, "DELETE");
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    fn handler<'a>() -> Next<'a> {
        Next::handler(|_ctx, _req| Box::pin(async { Response::empty(StatusCode::NO_CONTENT) }))
    }

    fn vary(response: &Response) -> Vec<&str> {
        response
            .headers()
            .get_all(header::VARY)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_vary_is_always_set() {
        let mut ctx = MiddlewareContext::new();
        let response = cors()
            .process(&mut ctx, request(Method::GET, None, false), handler())
            .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(vary(&response), vec!["Origin", "Access-Control-Request-Method"]);
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_trusted_origin_is_echoed() {
        let mut ctx = MiddlewareContext::new();
        let response = cors()
            .process(&mut ctx, request(Method::GET, Some(TRUSTED), false), handler())
            .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], TRUSTED);
    }

    #[tokio::test]
    async fn test_untrusted_origin_is_served_without_cors_headers() {
        let mut ctx = MiddlewareContext::new();
        let response = cors()
            .process(
                &mut ctx,
                request(Method::GET, Some("https://evil.example"), false),
                handler(),
            )
            .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_trusted_preflight_is_answered_here() {
        let mut ctx = MiddlewareContext::new();
        let response = cors()
            .process(&mut ctx, request(Method::OPTIONS, Some(TRUSTED), true), handler())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
            PREFLIGHT_ALLOW_METHODS
        );
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS],
            PREFLIGHT_ALLOW_HEADERS
        );
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], TRUSTED);
    }

    #[tokio::test]
    async fn test_untrusted_preflight_falls_through() {
        let mut ctx = MiddlewareContext::new();
        let response = cors()
            .process(
                &mut ctx,
                request(Method::OPTIONS, Some("https://evil.example"), true),
                handler(),
            )
            .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_origin_match_is_exact() {
        let cors = cors();
        assert!(cors.is_trusted(TRUSTED));
        assert!(!cors.is_trusted("https://cinemago.example/"));
        assert!(!cors.is_trusted("https://CINEMAGO.example"));
    }
}
