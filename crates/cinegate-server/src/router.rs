//! Request routing and path matching.
//!
//! Routes map a method and a path template to an operation ID. A route may
//! also name the permission code a caller must hold; the server copies it
//! into the middleware context so the permission stage can enforce it.
//!
//! # Example
//!
//! ```rust
//! use cinegate_server::{Resolution, Router};
//! use http::Method;
//!
//! let mut router = Router::new();
//! router.add_route(Method::GET, "/v1/healthcheck", "healthcheck");
//! router.add_protected_route(Method::GET, "/v1/movies/{id}", "showMovie", "movies:read");
//!
//! match router.resolve(&Method::GET, "/v1/movies/42") {
//!     Resolution::Matched(m) => {
//!         assert_eq!(m.operation_id(), "showMovie");
//!         assert_eq!(m.param("id"), Some("42"));
//!         assert_eq!(m.required_permission(), Some("movies:read"));
//!     }
//!     other => panic!("unexpected resolution: {other:?}"),
//! }
//! ```

use std::collections::HashMap;

use http::Method;

/// A matched route with extracted path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    operation_id: String,
    params: HashMap<String, String>,
    required_permission: Option<String>,
}

impl RouteMatch {
    /// Returns the operation ID for this route.
    #[must_use]
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Returns the extracted path parameters.
    #[must_use]
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Returns a specific path parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Permission code the route demands, if it is protected.
    #[must_use]
    pub fn required_permission(&self) -> Option<&str> {
        self.required_permission.as_deref()
    }

    /// Splits the match into its owned parts.
    #[must_use]
    pub fn into_parts(self) -> (String, HashMap<String, String>, Option<String>) {
        (self.operation_id, self.params, self.required_permission)
    }
}

/// Outcome of resolving a request against the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A route matched both method and path.
    Matched(RouteMatch),
    /// The path exists under other methods.
    MethodNotAllowed {
        /// Methods registered for the path, in registration order.
        allowed: Vec<Method>,
    },
    /// No route has this path.
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct Route {
    method: Method,
    segments: Vec<PathSegment>,
    operation_id: String,
    required_permission: Option<String>,
}

impl Route {
    fn new(
        method: Method,
        pattern: &str,
        operation_id: String,
        required_permission: Option<String>,
    ) -> Self {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => PathSegment::Param(name.to_string()),
                None => PathSegment::Literal(s.to_string()),
            })
            .collect();

        Self {
            method,
            segments,
            operation_id,
            required_permission,
        }
    }

    fn match_path(&self, path_segments: &[&str]) -> Option<HashMap<String, String>> {
        if path_segments.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (pattern, actual) in self.segments.iter().zip(path_segments) {
            match pattern {
                PathSegment::Literal(expected) if expected != actual => return None,
                PathSegment::Literal(_) => {}
                PathSegment::Param(name) => {
                    params.insert(name.clone(), (*actual).to_string());
                }
            }
        }
        Some(params)
    }
}

/// HTTP request router.
///
/// Path parameters use `{name}` syntax. Routes are tried in registration
/// order and the first match wins.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route any caller may reach.
    pub fn add_route(
        &mut self,
        method: Method,
        pattern: impl AsRef<str>,
        operation_id: impl Into<String>,
    ) {
        self.routes.push(Route::new(
            method,
            pattern.as_ref(),
            operation_id.into(),
            None,
        ));
    }

    /// Adds a route that requires `permission`.
    pub fn add_protected_route(
        &mut self,
        method: Method,
        pattern: impl AsRef<str>,
        operation_id: impl Into<String>,
        permission: impl Into<String>,
    ) {
        self.routes.push(Route::new(
            method,
            pattern.as_ref(),
            operation_id.into(),
            Some(permission.into()),
        ));
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Iterates over the operation IDs of every route.
    pub fn operation_ids(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.operation_id.as_str())
    }

    /// Resolves a request to a route, or explains why none matched.
    ///
    /// ```rust
    /// use cinegate_server::{Resolution, Router};
    /// use http::Method;
    ///
    /// let mut router = Router::new();
    /// router.add_route(Method::GET, "/v1/movies", "listMovies");
    /// router.add_route(Method::POST, "/v1/movies", "createMovie");
    ///
    /// assert_eq!(
    ///     router.resolve(&Method::DELETE, "/v1/movies"),
    ///     Resolution::MethodNotAllowed { allowed: vec![Method::GET, Method::POST] },
    /// );
    /// assert_eq!(router.resolve(&Method::GET, "/v1/users"), Resolution::NotFound);
    /// ```
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut allowed = Vec::new();

        for route in &self.routes {
            let Some(params) = route.match_path(&segments) else {
                continue;
            };
            if route.method == *method {
                return Resolution::Matched(RouteMatch {
                    operation_id: route.operation_id.clone(),
                    params,
                    required_permission: route.required_permission.clone(),
                });
            }
            if !allowed.contains(&route.method) {
                allowed.push(route.method.clone());
            }
        }

        if allowed.is_empty() {
            Resolution::NotFound
        } else {
            Resolution::MethodNotAllowed { allowed }
        }
    }
}

/// Decodes a query string into name/value pairs.
///
/// `+` is read as a space and percent escapes are decoded; a value that is
/// not valid UTF-8 after decoding is kept as written. A repeated name keeps
/// its last value.
///
/// ```rust
/// use cinegate_server::router::parse_query;
///
/// let query = parse_query(Some("title=the+thing&genres=sci-fi%2Chorror&page=2"));
/// assert_eq!(query["title"], "the thing");
/// assert_eq!(query["genres"], "sci-fi,horror");
/// assert_eq!(query["page"], "2");
/// ```
#[must_use]
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(name), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}
