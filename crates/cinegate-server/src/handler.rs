//! Handler registration and dispatch.
//!
//! Each operation ID maps to one async handler. Handlers receive the
//! immutable [`RequestContext`] the pipeline produced and return either a
//! response or a [`GatewayError`], which is rendered with the standard
//! error envelope.
//!
//! # Example
//!
//! ```rust
//! use cinegate_core::{GatewayResult, RequestContext};
//! use cinegate_middleware::{Response, ResponseExt};
//! use cinegate_server::HandlerRegistry;
//! use http::StatusCode;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct CreateMovie {
//!     title: String,
//! }
//!
//! async fn create_movie(_ctx: RequestContext, input: CreateMovie) -> GatewayResult<Response> {
//!     Ok(Response::json(StatusCode::CREATED, &serde_json::json!({ "title": input.title })))
//! }
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register_json("createMovie", create_movie);
//! assert!(registry.contains("createMovie"));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use cinegate_core::{GatewayError, GatewayResult, RequestContext};
use cinegate_middleware::{Response, ResponseExt};
use serde::de::DeserializeOwned;

/// Boxed future returned by an erased handler.
pub type BoxedHandlerResult = Pin<Box<dyn Future<Output = GatewayResult<Response>> + Send>>;

/// A type-erased handler function.
pub type ErasedHandler = Arc<dyn Fn(RequestContext, Bytes) -> BoxedHandlerResult + Send + Sync>;

/// Registry for operation handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, ErasedHandler>,
}

impl HandlerRegistry {
    /// Creates a new empty handler registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler that takes the raw body.
    pub fn register<F, Fut>(&mut self, operation_id: impl Into<String>, handler: F)
    where
        F: Fn(RequestContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GatewayResult<Response>> + Send + 'static,
    {
        let erased: ErasedHandler =
            Arc::new(move |ctx: RequestContext, body: Bytes| Box::pin(handler(ctx, body)));
        self.handlers.insert(operation_id.into(), erased);
    }

    /// Registers a handler whose body is decoded from JSON first.
    ///
    /// An empty or malformed body is rejected with a 400 before the handler
    /// runs.
    pub fn register_json<Req, F, Fut>(&mut self, operation_id: impl Into<String>, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GatewayResult<Response>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(operation_id, move |ctx: RequestContext, body: Bytes| {
            let handler = Arc::clone(&handler);
            async move {
                let input = decode_json::<Req>(&body)?;
                handler(ctx, input).await
            }
        });
    }

    /// Returns a shared handle to the handler for an operation.
    #[must_use]
    pub fn get(&self, operation_id: &str) -> Option<ErasedHandler> {
        self.handlers.get(operation_id).cloned()
    }

    /// Checks if a handler is registered for an operation.
    #[must_use]
    pub fn contains(&self, operation_id: &str) -> bool {
        self.handlers.contains_key(operation_id)
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ops: Vec<_> = self.handlers.keys().collect();
        ops.sort();
        f.debug_struct("HandlerRegistry")
            .field("operations", &ops)
            .finish()
    }
}

/// Runs a handler and renders its error, if any.
pub async fn invoke(handler: ErasedHandler, ctx: RequestContext, body: Bytes) -> Response {
    let request_id = ctx.request_id();
    match handler(ctx, body).await {
        Ok(response) => response,
        Err(error) => {
            if error.status_code().is_server_error() {
                tracing::error!(
                    request_id = %request_id,
                    error.kind = error.kind(),
                    error = %error,
                    "handler failed"
                );
            } else {
                tracing::debug!(
                    request_id = %request_id,
                    error.kind = error.kind(),
                    "handler rejected request"
                );
            }
            Response::from_gateway_error(&error)
        }
    }
}

fn decode_json<T: DeserializeOwned>(body: &Bytes) -> GatewayResult<T> {
    if body.is_empty() {
        return Err(GatewayError::bad_request("body must not be empty"));
    }
    serde_json::from_slice(body).map_err(|err| {
        let message = match err.classify() {
            serde_json::error::Category::Syntax | serde_json::error::Category::Eof => {
                format!("body contains badly-formed JSON (at line {})", err.line())
            }
            serde_json::error::Category::Data => format!("body contains invalid data: {err}"),
            serde_json::error::Category::Io => "body could not be read".to_string(),
        };
        GatewayError::bad_request(message)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegate_core::RequestId;
    use http::StatusCode;
    use http_body_util::BodyExt;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct CreateMovie {
        title: String,
        year: i32,
    }

    async fn create_movie(_ctx: RequestContext, input: CreateMovie) -> GatewayResult<Response> {
        Ok(Response::json(
            StatusCode::CREATED,
            &serde_json::json!({ "title": input.title, "year": input.year }),
        ))
    }

    fn ctx() -> RequestContext {
        RequestContext::new(RequestId::new())
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_json_handler_decodes_body() {
        let mut registry = HandlerRegistry::new();
        registry.register_json("createMovie", create_movie);

        let handler = registry.get("createMovie").unwrap();
        let body = Bytes::from_static(br#"{"title":"Casablanca","year":1942}"#);
        let response = invoke(handler, ctx(), body).await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await["year"], 1942);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let mut registry = HandlerRegistry::new();
        registry.register_json("createMovie", create_movie);

        let handler = registry.get("createMovie").unwrap();
        let response = invoke(handler, ctx(), Bytes::from_static(b"{\"title\":")).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("badly-formed JSON"));
    }

    #[tokio::test]
    async fn test_wrong_shape_and_empty_body() {
        let mut registry = HandlerRegistry::new();
        registry.register_json("createMovie", create_movie);
        let handler = registry.get("createMovie").unwrap();

        let response = invoke(
            Arc::clone(&handler),
            ctx(),
            Bytes::from_static(br#"{"title":"Up","year":"2009"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = invoke(handler, ctx(), Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"]["message"],
            "body must not be empty"
        );
    }

    #[tokio::test]
    async fn test_handler_error_rendered() {
        let mut registry = HandlerRegistry::new();
        registry.register("showMovie", |ctx: RequestContext, _body: Bytes| async move {
            Err::<Response, _>(GatewayError::not_found(
                ctx.param("id").unwrap_or_default().to_string(),
            ))
        });

        let response = invoke(registry.get("showMovie").unwrap(), ctx(), Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_registry_bookkeeping() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        registry.register_json("createMovie", create_movie);
        registry.register("healthcheck", |_ctx: RequestContext, _body: Bytes| async {
            Ok(Response::empty(StatusCode::OK))
        });

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("healthcheck"));
        assert!(registry.get("deleteMovie").is_none());
        assert_eq!(
            format!("{registry:?}"),
            r#"HandlerRegistry { operations: ["createMovie", "healthcheck"] }"#
        );
    }
}
