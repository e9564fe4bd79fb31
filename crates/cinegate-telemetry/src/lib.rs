//! Structured logging for cinegate services.
//!
//! Every cinegate crate logs through `tracing` macros with structured fields.
//! This crate owns the one place those events are turned into output: a
//! `tracing_subscriber` registry with an [`EnvFilter`](tracing_subscriber::EnvFilter)
//! and either a JSON layer (production) or a pretty layer (development).
//!
//! # Example
//!
//! ```no_run
//! use cinegate_telemetry::{init_logging, LogConfig};
//!
//! # fn main() -> Result<(), cinegate_telemetry::TelemetryError> {
//! init_logging(&LogConfig::production())?;
//! tracing::info!(addr = "0.0.0.0:8000", "starting server");
//! # Ok(())
//! # }
//! ```
//!
//! # Log Fields
//!
//! Field names shared across crates live in [`fields`], so audit entries for
//! the same request can be joined on `request_id`.

#![warn(missing_docs)]

pub mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{create_env_filter, fields, init_logging, LogConfig, LogFormat};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
