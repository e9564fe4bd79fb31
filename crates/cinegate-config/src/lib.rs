//! Typed configuration for cinegate.
//!
//! - TOML and JSON configuration files
//! - `CINEGATE__SECTION__KEY` environment overrides, optionally from `.env`
//! - Strict parsing (unknown keys fail)
//! - Layered merging (preset → files → env), followed by validation
//!
//! # Example
//!
//! ```no_run
//! use cinegate_config::ConfigLoader;
//!
//! # fn main() -> Result<(), cinegate_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("cinegate.toml")?
//!     .with_env_prefix("CINEGATE")
//!     .load()?;
//!
//! println!("limiter burst: {}", config.limiter.burst);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8000"
//! environment = "production"
//! request_timeout_ms = 30000
//! shutdown_timeout_secs = 30
//! drain_timeout_secs = 30
//! trust_proxy_headers = false
//! max_body_bytes = 5242880
//!
//! [limiter]
//! enabled = true
//! rps = 2.0
//! burst = 4
//!
//! [auth]
//! enforce_permissions = true
//! lookup_timeout_ms = 3000
//!
//! [cors]
//! trusted_origins = ["https://cinemago.example"]
//!
//! [smtp]
//! host = "sandbox.smtp.mailtrap.io"
//! port = 25
//! sender = "CinemaGo <no-reply@cinmemago.net>"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::CinegateConfig;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;

pub use cinegate_telemetry::LogFormat;
