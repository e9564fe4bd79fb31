//! Request handlers, one module per resource.
//!
//! Every handler takes the shared [`AppState`](crate::app::AppState), the
//! request context and either the raw body or a decoded JSON input, and
//! returns an [`AppResult`](crate::error::AppResult).

pub mod health;
pub mod movies;
pub mod tokens;
pub mod users;

/// Permission to read the movie catalog.
pub const MOVIES_READ: &str = "movies:read";

/// Permission to change the movie catalog.
pub const MOVIES_WRITE: &str = "movies:write";
