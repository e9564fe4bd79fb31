//! # Cinegate
//!
//! The CinemaGo movies and users API, served through the cinegate gateway.
//!
//! - [`catalog`]: movies, their validation, filtering and pagination
//! - [`accounts`]: user profiles with unique e-mail addresses
//! - [`mailer`]: welcome e-mails, sent as background tasks
//! - [`password`]: Argon2id password hashing
//! - [`handlers`]: one async handler per route
//! - [`app`]: shared state and server assembly
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cinegate::app::{build_server, AppState};
//! use cinegate_config::CinegateConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CinegateConfig::development();
//!     let state = Arc::new(AppState::from_config(&config));
//!     let report = build_server(&config, &state)?.run().await?;
//!     assert!(report.drain.is_drained());
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/cinegate/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod accounts;
pub mod app;
pub mod catalog;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod password;
pub mod validation;

pub use app::{build_server, AppState};
pub use error::{AppError, AppResult};
