//! Server error types.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised while building or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured bind address does not parse.
    #[error("invalid bind address '{addr}': {source}")]
    InvalidAddress {
        /// The rejected address.
        addr: String,
        /// Parser error.
        #[source]
        source: std::net::AddrParseError,
    },

    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A route names an operation with no registered handler.
    #[error("no handler registered for operation '{operation_id}'")]
    MissingHandler {
        /// The unhandled operation.
        operation_id: String,
    },

    /// I/O error on the listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
