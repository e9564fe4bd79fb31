//! Gateway stages.
//!
//! In pipeline order:
//!
//! 1. [`recover`] - Panic barrier
//! 2. [`cors`] - CORS headers and preflight
//! 3. [`rate_limit`] - Per-client token buckets
//! 4. [`authenticate`] - Bearer token to identity
//! 5. [`permission`] - Route permission codes

pub mod authenticate;
pub mod cors;
pub mod permission;
pub mod rate_limit;
pub mod recover;

pub use authenticate::{AuthenticateMiddleware, Authenticator};
pub use cors::CorsMiddleware;
pub use permission::{PermissionGate, PermissionMiddleware};
pub use rate_limit::{ClientLimiterRegistry, LimiterConfig, RateLimitMiddleware, TokenBucket};
pub use recover::{install_panic_hook, RecoverMiddleware};
