//! # Cinegate Core
//!
//! Core types shared by every layer of the cinegate request gateway.
//!
//! This crate provides the foundational types used throughout cinegate:
//!
//! - [`RequestId`] - UUID v7 request identifier
//! - [`RequestContext`] - Immutable per-request view handed to handlers
//! - [`Identity`] - Anonymous or authenticated caller, with its [`Permissions`]
//! - [`PlaintextToken`] / [`TokenHash`] - Bearer credentials and their one-way hash
//! - [`TokenStore`], [`PermissionStore`], [`UserStore`] - External store seams
//! - [`GatewayError`] - The gateway error taxonomy and its HTTP mapping
//! - [`memory`] - In-memory store implementations

#![doc(html_root_url = "https://docs.rs/cinegate-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod identity;
pub mod memory;
mod panic;
mod store;
mod token;

pub use context::{RequestContext, RequestId};
pub use error::{ErrorCategory, ErrorDetail, ErrorEnvelope, GatewayError, GatewayResult};
pub use identity::{AuthenticatedUser, Identity, Permissions, UserId};
pub use panic::describe_panic;
pub use store::{PermissionStore, StoreError, TokenStore, UserRecord, UserStore};
pub use token::{PlaintextToken, TokenHash, TokenRecord, TokenScope, TOKEN_PLAINTEXT_LEN};
