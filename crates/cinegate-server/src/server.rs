//! HTTP server.
//!
//! One hyper HTTP/1.1 connection task per accepted socket. Every request is
//! resolved against the [`Router`], run through the gateway [`Pipeline`] and
//! dispatched to its handler, all under the request timeout.
//!
//! Shutdown stops the accept loop, asks each connection to finish its
//! current exchange, waits for connections up to the shutdown timeout, and
//! finally drains the [`BackgroundTasks`].
//!
//! # Example
//!
//! ```rust,no_run
//! use cinegate_core::{GatewayResult, RequestContext};
//! use cinegate_middleware::{Response, ResponseExt};
//! use cinegate_server::{Server, ServerConfig};
//! use http::{Method, StatusCode};
//!
//! # async fn run() -> Result<(), cinegate_server::ServerError> {
//! let server = Server::builder()
//!     .config(ServerConfig::builder().http_addr("127.0.0.1:8000").build())
//!     .route(Method::GET, "/v1/healthcheck", "healthcheck")
//!     .handler("healthcheck", |_ctx: RequestContext, _body: bytes::Bytes| async {
//!         GatewayResult::Ok(Response::json(StatusCode::OK, &serde_json::json!({"status": "available"})))
//!     })
//!     .build()?;
//!
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use cinegate_core::{GatewayError, GatewayResult, RequestContext, RequestId};
use cinegate_middleware::stages::{
    AuthenticateMiddleware, Authenticator, ClientLimiterRegistry, CorsMiddleware, PermissionGate,
    PermissionMiddleware, RateLimitMiddleware, RecoverMiddleware,
};
use cinegate_middleware::{
    BoxFuture, MiddlewareContext, Pipeline, Request, Response, ResponseExt,
};
use cinegate_tasks::{BackgroundTasks, DrainOutcome};
use http::{header, HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handler::{self, ErasedHandler, HandlerRegistry};
use crate::router::{parse_query, Resolution, Router};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Header carrying the per-request ID on every response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// What a completed shutdown achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether every connection closed within the shutdown timeout.
    pub connections_drained: bool,
    /// Outcome of draining background tasks.
    pub drain: DrainOutcome,
}

/// The cinegate HTTP server.
pub struct Server {
    config: ServerConfig,
    router: Router,
    handlers: HandlerRegistry,
    pipeline: Pipeline,
    limiter: Option<Arc<ClientLimiterRegistry>>,
    tasks: BackgroundTasks,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("routes", &self.router.route_count())
            .field("handlers", &self.handlers)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a new server builder.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the route table.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Returns the gateway pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Returns the background task manager drained at shutdown.
    #[must_use]
    pub fn background_tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Runs until SIGTERM or SIGINT.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run(self) -> Result<ShutdownReport, ServerError> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals()).await
    }

    /// Binds the configured address and runs until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run_with_shutdown(
        self,
        shutdown: ShutdownSignal,
    ) -> Result<ShutdownReport, ServerError> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|source| ServerError::InvalidAddress {
                addr: self.config.http_addr().to_string(),
                source,
            })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        self.run_with_listener(listener, shutdown).await
    }

    /// Serves connections from an already bound listener until `shutdown`
    /// fires, then shuts down gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener has no local address.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<ShutdownReport, ServerError> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, routes = self.router.route_count(), "server listening");

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();

        let sweeper = server.limiter.as_ref().map(|limiter| {
            let limiter = Arc::clone(limiter);
            let stop = shutdown.wait();
            tokio::spawn(async move { limiter.run_sweeper(stop).await })
        });

        let stop_accepting = shutdown.wait();
        tokio::pin!(stop_accepting);

        loop {
            tokio::select! {
                () = &mut stop_accepting => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&server);
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            server.serve_connection(stream, peer, shutdown).await;
                            drop(token);
                        });
                    }
                    Err(err) => warn!(error = %err, "failed to accept connection"),
                },
            }
        }
        drop(listener);

        let shutdown_timeout = server.config.shutdown_timeout();
        info!(
            active = tracker.active_connections(),
            timeout = ?shutdown_timeout,
            "stopped accepting connections"
        );
        let connections_drained =
            match tokio::time::timeout(shutdown_timeout, tracker.wait_idle()).await {
                Ok(()) => true,
                Err(_) => {
                    warn!(
                        remaining = tracker.active_connections(),
                        "connection drain timed out"
                    );
                    false
                }
            };

        let drain = server.tasks.shutdown(server.config.drain_timeout()).await;

        if let Some(sweeper) = sweeper {
            if let Err(err) = sweeper.await {
                warn!(error = %err, "limiter sweeper ended abnormally");
            }
        }

        info!(connections_drained, drained = drain.is_drained(), "server stopped");
        Ok(ShutdownReport {
            connections_drained,
            drain,
        })
    }

    async fn serve_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: ShutdownSignal,
    ) {
        let server = self;
        let service = service_fn(move |request: http::Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { Ok::<_, Infallible>(server.handle_request(request, peer).await) }
        });

        let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);
        let stop = shutdown.wait();
        tokio::pin!(stop);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            () = &mut stop => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };

        if let Err(err) = result {
            debug!(peer = %peer, error = %err, "connection ended with error");
        }
    }

    async fn handle_request(&self, request: http::Request<Incoming>, peer: SocketAddr) -> Response {
        let request_id = RequestId::new();
        let deadline = Instant::now() + self.config.request_timeout();
        let (parts, body) = request.into_parts();
        let limit = self.config.max_body_bytes();

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body_read = if declared.is_some_and(|len| len > limit as u64) {
            None
        } else {
            Some(tokio::time::timeout_at(deadline, Limited::new(body, limit).collect()).await)
        };

        let mut response = match body_read {
            None => payload_too_large(request_id, peer, limit),
            Some(Ok(Ok(collected))) => {
                let request = http::Request::from_parts(parts, Full::new(collected.to_bytes()));
                self.dispatch(request, request_id, peer, deadline).await
            }
            Some(Ok(Err(err))) if err.is::<LengthLimitError>() => {
                payload_too_large(request_id, peer, limit)
            }
            Some(Ok(Err(err))) => {
                debug!(request_id = %request_id, error = %err, "failed to read request body");
                Response::from_gateway_error(&GatewayError::bad_request(
                    "the request body could not be read",
                ))
            }
            Some(Err(_)) => {
                warn!(request_id = %request_id, client = %peer, "timed out reading request body");
                Response::from_gateway_error(&GatewayError::RequestTimeout)
            }
        };

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }

    async fn dispatch(
        &self,
        request: Request,
        request_id: RequestId,
        peer: SocketAddr,
        deadline: Instant,
    ) -> Response {
        let mut ctx = MiddlewareContext::with_request_id(request_id);
        ctx.set_client_addr(peer);
        ctx.set_deadline(deadline);
        ctx.set_query(parse_query(request.uri().query()));

        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let endpoint = match self.router.resolve(&method, &path) {
            Resolution::Matched(route) => {
                let (operation_id, params, permission) = route.into_parts();
                let endpoint = match self.handlers.get(&operation_id) {
                    Some(handler) => Endpoint::Handler(handler),
                    None => Endpoint::Unhandled(operation_id.clone()),
                };
                ctx.set_operation_id(operation_id);
                ctx.set_params(params);
                if let Some(permission) = permission {
                    ctx.set_required_permission(permission);
                }
                endpoint
            }
            Resolution::MethodNotAllowed { allowed } => Endpoint::MethodNotAllowed(allowed),
            Resolution::NotFound => Endpoint::NotFound(path.clone()),
        };

        let processed = tokio::time::timeout_at(
            deadline,
            self.pipeline.process(
                &mut ctx,
                request,
                move |ctx: &mut MiddlewareContext, request: Request| endpoint.respond(ctx, request),
            ),
        )
        .await;

        let mut response = processed.unwrap_or_else(|_| {
            warn!(
                request_id = %request_id,
                method = %method,
                path = %path,
                "request timed out"
            );
            Response::from_gateway_error(&GatewayError::RequestTimeout)
        });

        if ctx.should_close_connection() {
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        }

        debug!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            elapsed_ms = ctx.elapsed().as_millis(),
            "request completed"
        );
        response
    }
}

/// 413 for an oversized body. The rest of the body is never read, so the
/// connection is closed after the response.
fn payload_too_large(request_id: RequestId, peer: SocketAddr, limit: usize) -> Response {
    warn!(
        request_id = %request_id,
        client = %peer,
        limit,
        "request body over limit"
    );
    let mut response = Response::from_gateway_error(&GatewayError::PayloadTooLarge { limit });
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Where a request ends up once the pipeline lets it through.
enum Endpoint {
    Handler(ErasedHandler),
    MethodNotAllowed(Vec<Method>),
    NotFound(String),
    Unhandled(String),
}

impl Endpoint {
    fn respond(self, ctx: &mut MiddlewareContext, request: Request) -> BoxFuture<'static, Response> {
        match self {
            Self::Handler(handler) => {
                let request_ctx: RequestContext = ctx.to_request_context();
                Box::pin(async move {
                    let body = match request.into_body().collect().await {
                        Ok(collected) => collected.to_bytes(),
                        Err(never) => match never {},
                    };
                    handler::invoke(handler, request_ctx, body).await
                })
            }
            Self::MethodNotAllowed(allowed) => {
                let mut response = Response::from_gateway_error(&GatewayError::MethodNotAllowed);
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    response.headers_mut().insert(header::ALLOW, value);
                }
                Box::pin(async move { response })
            }
            Self::NotFound(path) => {
                let response = Response::from_gateway_error(&GatewayError::not_found(path));
                Box::pin(async move { response })
            }
            Self::Unhandled(operation_id) => {
                warn!(operation_id = %operation_id, "route has no handler");
                let response = Response::json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "the server encountered a problem and could not process your request",
                );
                Box::pin(async move { response })
            }
        }
    }
}

/// Builder for [`Server`].
///
/// Without a custom [`pipeline`](Self::pipeline), [`build`](Self::build)
/// assembles the gateway stages in order: recover, CORS, rate limit (when a
/// limiter is set), authenticate (when an authenticator is set), permission.
#[derive(Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    router: Router,
    handlers: HandlerRegistry,
    limiter: Option<Arc<ClientLimiterRegistry>>,
    authenticator: Option<Arc<Authenticator>>,
    permission_gate: PermissionGate,
    trusted_origins: Vec<String>,
    tasks: BackgroundTasks,
    pipeline: Option<Pipeline>,
}

impl ServerBuilder {
    /// Sets the server configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a route any caller may reach.
    #[must_use]
    pub fn route(mut self, method: Method, path: &str, operation_id: &str) -> Self {
        self.router.add_route(method, path, operation_id);
        self
    }

    /// Adds a route that requires a permission code.
    #[must_use]
    pub fn protected_route(
        mut self,
        method: Method,
        path: &str,
        operation_id: &str,
        permission: &str,
    ) -> Self {
        self.router
            .add_protected_route(method, path, operation_id, permission);
        self
    }

    /// Registers a handler that takes the raw body.
    #[must_use]
    pub fn handler<F, Fut>(mut self, operation_id: &str, handler: F) -> Self
    where
        F: Fn(RequestContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GatewayResult<Response>> + Send + 'static,
    {
        self.handlers.register(operation_id, handler);
        self
    }

    /// Registers a handler whose body is decoded from JSON.
    #[must_use]
    pub fn json_handler<Req, F, Fut>(mut self, operation_id: &str, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GatewayResult<Response>> + Send + 'static,
    {
        self.handlers.register_json(operation_id, handler);
        self
    }

    /// Replaces the handler registry.
    #[must_use]
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Enables per-client rate limiting with a shared registry.
    #[must_use]
    pub fn rate_limiter(mut self, limiter: Arc<ClientLimiterRegistry>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Enables bearer-token authentication.
    #[must_use]
    pub fn authenticator(mut self, authenticator: Arc<Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Sets the permission gate for protected routes.
    #[must_use]
    pub fn permission_gate(mut self, gate: PermissionGate) -> Self {
        self.permission_gate = gate;
        self
    }

    /// Sets the origins the CORS stage trusts.
    #[must_use]
    pub fn trusted_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Shares a background task manager with handlers.
    #[must_use]
    pub fn background_tasks(mut self, tasks: BackgroundTasks) -> Self {
        self.tasks = tasks;
        self
    }

    /// Uses a custom pipeline instead of the gateway stages.
    #[must_use]
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Builds the server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::MissingHandler`] if a route names an operation
    /// with no handler.
    pub fn build(self) -> Result<Server, ServerError> {
        if let Some(operation_id) = self
            .router
            .operation_ids()
            .find(|id| !self.handlers.contains(id))
        {
            return Err(ServerError::MissingHandler {
                operation_id: operation_id.to_string(),
            });
        }

        let pipeline = match self.pipeline {
            Some(pipeline) => pipeline,
            None => {
                let mut builder = Pipeline::builder()
                    .add_stage(RecoverMiddleware::new())
                    .add_stage(CorsMiddleware::new(self.trusted_origins));
                if let Some(limiter) = &self.limiter {
                    builder = builder.add_stage(
                        RateLimitMiddleware::new(Arc::clone(limiter))
                            .trust_proxy_headers(self.config.trust_proxy_headers()),
                    );
                }
                if let Some(authenticator) = self.authenticator {
                    builder = builder.add_stage(AuthenticateMiddleware::new(authenticator));
                }
                builder
                    .add_stage(PermissionMiddleware::new(self.permission_gate))
                    .build()
            }
        };

        Ok(Server {
            config: self.config,
            router: self.router,
            handlers: self.handlers,
            pipeline,
            limiter: self.limiter,
            tasks: self.tasks,
        })
    }
}
