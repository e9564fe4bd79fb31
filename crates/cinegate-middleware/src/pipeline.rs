//! Ordered middleware pipeline.
//!
//! ## Pipeline Stages
//!
//! The gateway runs five stages in a fixed order:
//!
//! 1. **Recover** - Catch handler panics, answer 500 and close the connection
//! 2. **CORS** - `Vary` headers, trusted-origin echo, preflight answers
//! 3. **Rate limit** - Per-client token bucket admission
//! 4. **Authenticate** - Resolve the bearer token to an identity
//! 5. **Permission** - Check the route's permission code
//!
//! The barrier is outermost so a fault anywhere below it, including in the
//! other stages, is contained.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use std::sync::Arc;

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// An immutable chain of stages in front of a handler.
///
/// # Example
///
/// ```
/// use cinegate_middleware::stages::{CorsMiddleware, RecoverMiddleware};
/// use cinegate_middleware::{MiddlewareContext, Pipeline, Request, Response, ResponseExt};
/// use http::StatusCode;
///
/// # tokio_test::block_on(async {
/// let pipeline = Pipeline::builder()
///     .add_stage(RecoverMiddleware::new())
///     .add_stage(CorsMiddleware::new(Vec::<String>::new()))
///     .build();
/// assert_eq!(pipeline.stage_names(), vec!["recover", "cors"]);
///
/// let mut ctx = MiddlewareContext::new();
/// let request: Request = http::Request::builder()
///     .uri("/v1/healthcheck")
///     .body(http_body_util::Full::new(bytes::Bytes::new()))
///     .unwrap();
/// let response = pipeline
///     .process(&mut ctx, request, |_ctx, _req| {
///         Box::pin(async { Response::empty(StatusCode::OK) })
///     })
///     .await;
/// assert_eq!(response.status(), StatusCode::OK);
/// # });
/// ```
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Runs `request` through every stage, then `handler`.
    ///
    /// The context is borrowed so the caller can read what the stages
    /// decided (for example, that the connection must close).
    pub async fn process<H>(
        &self,
        ctx: &mut MiddlewareContext,
        request: Request,
        handler: H,
    ) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        let next = self.build_chain(handler);
        next.run(ctx, request).await
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Returns the names of all stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|mw| mw.name()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage. Stages run in the order they are added.
    #[must_use]
    pub fn add_stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        let pipeline = Pipeline {
            stages: self.stages,
        };
        tracing::debug!(stages = ?pipeline.stage_names(), "middleware pipeline built");
        pipeline
    }
}

/// The gateway stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Panic barrier.
    Recover = 1,
    /// CORS headers and preflight.
    Cors = 2,
    /// Per-client admission.
    RateLimit = 3,
    /// Bearer token resolution.
    Authenticate = 4,
    /// Route permission check.
    Permission = 5,
}

impl Stage {
    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Recover => "recover",
            Self::Cors => "cors",
            Self::RateLimit => "rate_limit",
            Self::Authenticate => "authenticate",
            Self::Permission => "permission",
        }
    }

    /// Returns all stages in order.
    #[must_use]
    pub const fn all() -> [Stage; 5] {
        [
            Self::Recover,
            Self::Cors,
            Self::RateLimit,
            Self::Authenticate,
            Self::Permission,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
    use http_body_util::Full;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records the order stages were entered and left in.
    struct OrderTracking {
        name: &'static str,
        order: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    impl Middleware for OrderTracking {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                self.order.lock().push(format!("enter:{}", self.name));
                let response = next.run(ctx, request).await;
                self.order.lock().push(format!("leave:{}", self.name));
                response
            })
        }
    }

    fn request() -> Request {
        HttpRequest::builder()
            .uri("/v1/movies")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_pipeline_nests_stages_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .add_stage(OrderTracking {
                name: "outer",
                order: Arc::clone(&order),
            })
            .add_stage(OrderTracking {
                name: "inner",
                order: Arc::clone(&order),
            })
            .build();

        let handled = Arc::new(AtomicUsize::new(0));
        let handled_in_handler = Arc::clone(&handled);
        let mut ctx = MiddlewareContext::new();
        let response = pipeline
            .process(&mut ctx, request(), move |_ctx, _req| {
                handled_in_handler.fetch_add(1, Ordering::SeqCst);
                Box::pin(async {
                    HttpResponse::builder()
                        .status(StatusCode::OK)
                        .body(Full::new(Bytes::new()))
                        .unwrap()
                })
            })
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert_eq!(
            *order.lock(),
            vec!["enter:outer", "enter:inner", "leave:inner", "leave:outer"]
        );
    }

    #[tokio::test]
    async fn test_empty_pipeline_calls_handler() {
        let pipeline = Pipeline::builder().build();
        assert_eq!(pipeline.stage_count(), 0);

        let mut ctx = MiddlewareContext::new();
        let response = pipeline
            .process(&mut ctx, request(), |_ctx, _req| {
                Box::pin(async {
                    HttpResponse::builder()
                        .status(StatusCode::NO_CONTENT)
                        .body(Full::new(Bytes::new()))
                        .unwrap()
                })
            })
            .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_stage_ordering() {
        let all = Stage::all();
        assert!(all.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(all[0], Stage::Recover);
        assert_eq!(all[4], Stage::Permission);
    }

    #[test]
    fn test_stage_names() {
        let names: Vec<_> = Stage::all().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec!["recover", "cors", "rate_limit", "authenticate", "permission"]
        );
    }
}
