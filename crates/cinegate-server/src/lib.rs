//! # Cinegate Server
//!
//! The HTTP/1.1 front of the gateway, built on hyper and tokio.
//!
//! - [`Router`]: method and path templates to operation IDs, with an
//!   optional permission code per route
//! - [`HandlerRegistry`]: one async handler per operation
//! - [`Server`]: accept loop, per-request timeout, the gateway pipeline,
//!   `x-request-id` stamping
//! - [`ShutdownSignal`] and [`ConnectionTracker`]: graceful shutdown that
//!   waits for connections, then drains background tasks
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cinegate_core::memory::MemoryStore;
//! use cinegate_middleware::stages::{Authenticator, ClientLimiterRegistry, LimiterConfig};
//! use cinegate_server::{Server, ServerConfig};
//! use http::Method;
//!
//! # async fn list_movies(
//! #     _ctx: cinegate_core::RequestContext,
//! #     _body: bytes::Bytes,
//! # ) -> cinegate_core::GatewayResult<cinegate_middleware::Response> {
//! #     unimplemented!()
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let server = Server::builder()
//!         .config(ServerConfig::builder().http_addr("0.0.0.0:8000").build())
//!         .protected_route(Method::GET, "/v1/movies", "listMovies", "movies:read")
//!         .handler("listMovies", list_movies)
//!         .rate_limiter(Arc::new(ClientLimiterRegistry::new(LimiterConfig::default())))
//!         .authenticator(Arc::new(Authenticator::new(store.clone(), store)))
//!         .build()?;
//!
//!     let report = server.run().await?;
//!     println!("drained: {}", report.drain.is_drained());
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/cinegate-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod shutdown;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::ServerError;
pub use handler::{BoxedHandlerResult, ErasedHandler, HandlerRegistry};
pub use router::{Resolution, RouteMatch, Router};
pub use server::{Server, ServerBuilder, ShutdownReport, REQUEST_ID_HEADER};
pub use shutdown::{ConnectionTracker, ConnectionToken, ShutdownSignal};
