//! # Cinegate Middleware
//!
//! The gateway pipeline that sits in front of every cinegate handler.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Request → Recover → CORS → RateLimit → Authenticate → Permission → Handler
//!                                                                       ↓
//! Response ←──────────────────────────────────────────────────────────┘
//! ```
//!
//! | Stage | Middleware   | Purpose                                            |
//! |-------|--------------|----------------------------------------------------|
//! | 1     | Recover      | Contain panics, 500 + `Connection: close`          |
//! | 2     | CORS         | `Vary`, trusted-origin echo, preflight             |
//! | 3     | Rate limit   | Per-client token bucket, 429 with no body          |
//! | 4     | Authenticate | Bearer token to [`Identity`](cinegate_core::Identity), 401 on failure |
//! | 5     | Permission   | Route permission code, 401/403 on failure          |
//!
//! Each stage is an ordinary [`Middleware`]; the server assembles them with
//! [`Pipeline::builder`] in [`Stage`] order.
//!
//! ## Example
//!
//! ```
//! use cinegate_middleware::pipeline::Stage;
//!
//! let stages = Stage::all();
//! assert_eq!(stages.len(), 5);
//! assert_eq!(stages[0].name(), "recover");
//! assert_eq!(stages[4].name(), "permission");
//! ```

#![doc(html_root_url = "https://docs.rs/cinegate-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

// Re-export main types at crate root
pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder, Stage};
pub use types::{Request, Response, ResponseExt};
