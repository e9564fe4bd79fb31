//! Middleware context types.
//!
//! The [`MiddlewareContext`] carries per-request state through the gateway
//! stages. It is separate from [`RequestContext`](cinegate_core::RequestContext)
//! so stages can enrich it before the final, immutable view is handed to the
//! handler.

use cinegate_core::{Identity, RequestContext, RequestId};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Context that flows through the middleware pipeline.
///
/// The server fills in the transport facts (peer address, deadline, matched
/// route); the authenticate stage attaches the [`Identity`]; the panic
/// barrier flags the connection for closure.
///
/// # Example
///
/// ```
/// use cinegate_core::{AuthenticatedUser, Identity, Permissions, UserId};
/// use cinegate_middleware::MiddlewareContext;
///
/// let mut ctx = MiddlewareContext::new();
/// assert!(ctx.identity().is_anonymous());
///
/// ctx.set_identity(Identity::User(AuthenticatedUser::new(
///     UserId::new(7),
///     Permissions::from_codes(["movies:read"]),
/// )));
/// assert!(ctx.identity().has_permission("movies:read"));
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    request_id: RequestId,
    identity: Arc<Identity>,
    operation_id: Option<String>,
    /// Permission code the matched route demands, if any.
    required_permission: Option<String>,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    client_addr: Option<SocketAddr>,
    deadline: Option<tokio::time::Instant>,
    started_at: Instant,
    close_connection: bool,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MiddlewareContext {
    /// Creates a new context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(RequestId::new())
    }

    /// Creates a context with a specific request ID.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            identity: Arc::new(Identity::Anonymous),
            operation_id: None,
            required_permission: None,
            params: HashMap::new(),
            query: HashMap::new(),
            client_addr: None,
            deadline: None,
            started_at: Instant::now(),
            close_connection: false,
            extensions: HashMap::new(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the caller identity. Anonymous until authenticated.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Attaches the caller identity.
    ///
    /// Only the authenticate stage calls this, once per request.
    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Arc::new(identity);
    }

    /// Returns the matched operation ID.
    #[must_use]
    pub fn operation_id(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    /// Sets the matched operation ID.
    pub fn set_operation_id(&mut self, operation_id: impl Into<String>) {
        self.operation_id = Some(operation_id.into());
    }

    /// Returns the permission code the route requires.
    #[must_use]
    pub fn required_permission(&self) -> Option<&str> {
        self.required_permission.as_deref()
    }

    /// Sets the permission code the route requires.
    pub fn set_required_permission(&mut self, code: impl Into<String>) {
        self.required_permission = Some(code.into());
    }

    /// Returns a path parameter captured by the router.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Replaces the captured path parameters.
    pub fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    /// Replaces the decoded query string parameters.
    pub fn set_query(&mut self, query: HashMap<String, String>) {
        self.query = query;
    }

    /// Returns the peer address of the connection.
    #[must_use]
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    /// Sets the peer address of the connection.
    pub fn set_client_addr(&mut self, addr: SocketAddr) {
        self.client_addr = Some(addr);
    }

    /// Returns the instant by which the request must be answered.
    #[must_use]
    pub fn deadline(&self) -> Option<tokio::time::Instant> {
        self.deadline
    }

    /// Sets the request deadline.
    pub fn set_deadline(&mut self, deadline: tokio::time::Instant) {
        self.deadline = Some(deadline);
    }

    /// Returns when the request started processing.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Asks the server to close the connection after this response.
    pub fn mark_close_connection(&mut self) {
        self.close_connection = true;
    }

    /// Whether the connection must be closed after this response.
    #[must_use]
    pub fn should_close_connection(&self) -> bool {
        self.close_connection
    }

    /// Stores a typed extension value.
    ///
    /// # Example
    ///
    /// ```
    /// use cinegate_middleware::MiddlewareContext;
    ///
    /// struct ClientKey(String);
    ///
    /// let mut ctx = MiddlewareContext::new();
    /// ctx.set_extension(ClientKey("203.0.113.9".to_string()));
    /// assert_eq!(ctx.get_extension::<ClientKey>().unwrap().0, "203.0.113.9");
    /// ```
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Checks if an extension of the given type exists.
    #[must_use]
    pub fn has_extension<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }

    /// Builds the immutable view handed to the handler.
    ///
    /// The identity is shared, not copied.
    #[must_use]
    pub fn to_request_context(&self) -> RequestContext {
        let mut ctx = RequestContext::new(self.request_id)
            .with_identity(Arc::clone(&self.identity))
            .with_params(self.params.clone())
            .with_query(self.query.clone());

        if let Some(op_id) = &self.operation_id {
            ctx = ctx.with_operation_id(op_id.clone());
        }

        ctx
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegate_core::{AuthenticatedUser, Permissions, UserId};

    fn reader() -> Identity {
        Identity::User(AuthenticatedUser::new(
            UserId::new(3),
            Permissions::from_codes(["movies:read"]),
        ))
    }

    #[test]
    fn test_new_context_is_anonymous_and_open() {
        let ctx = MiddlewareContext::new();
        assert!(ctx.identity().is_anonymous());
        assert!(ctx.required_permission().is_none());
        assert!(ctx.client_addr().is_none());
        assert!(!ctx.should_close_connection());
    }

    #[test]
    fn test_route_facts() {
        let mut ctx = MiddlewareContext::new();
        ctx.set_operation_id("showMovie");
        ctx.set_required_permission("movies:read");
        ctx.set_params(HashMap::from([("id".to_string(), "42".to_string())]));
        ctx.set_client_addr("192.0.2.1:5555".parse().unwrap());

        assert_eq!(ctx.operation_id(), Some("showMovie"));
        assert_eq!(ctx.required_permission(), Some("movies:read"));
        assert_eq!(ctx.param("id"), Some("42"));
        assert_eq!(ctx.param("missing"), None);
        assert_eq!(ctx.client_addr().unwrap().port(), 5555);
    }

    #[test]
    fn test_close_connection_flag() {
        let mut ctx = MiddlewareContext::new();
        ctx.mark_close_connection();
        assert!(ctx.should_close_connection());
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, PartialEq)]
        struct Marker(u8);

        let mut ctx = MiddlewareContext::new();
        assert!(!ctx.has_extension::<Marker>());

        ctx.set_extension(Marker(1));
        assert_eq!(ctx.get_extension::<Marker>(), Some(&Marker(1)));
        assert_eq!(ctx.remove_extension::<Marker>(), Some(Marker(1)));
        assert!(!ctx.has_extension::<Marker>());
    }

    #[test]
    fn test_to_request_context_shares_identity() {
        let mut ctx = MiddlewareContext::new();
        ctx.set_identity(reader());
        ctx.set_operation_id("listMovies");
        ctx.set_params(HashMap::from([("id".to_string(), "9".to_string())]));

        let req_ctx = ctx.to_request_context();
        assert_eq!(req_ctx.request_id(), ctx.request_id());
        assert_eq!(req_ctx.identity(), ctx.identity());
        assert_eq!(req_ctx.operation_id(), Some("listMovies"));
        assert_eq!(req_ctx.param("id"), Some("9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let mut ctx = MiddlewareContext::new();
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(30);
        ctx.set_deadline(deadline);
        assert_eq!(ctx.deadline(), Some(deadline));
    }
}
