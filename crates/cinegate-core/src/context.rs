//! Request identifiers and the handler-facing request context.
//!
//! The [`RequestContext`] is the read-only snapshot a handler receives once
//! the gateway stages have resolved identity and routing.

use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps log lines for one request easy to
/// correlate and sort.
///
/// # Example
///
/// ```
/// use cinegate_core::RequestId;
///
/// let id = RequestId::new();
/// assert_eq!(id.to_string().len(), 36);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-request context handed to handlers.
///
/// The identity is shared behind an [`Arc`]: it was attached once by the
/// authentication stage and nothing downstream can change it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    identity: Arc<Identity>,
    operation_id: Option<String>,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
}

impl RequestContext {
    /// Creates an anonymous context with the given request ID.
    #[must_use]
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            identity: Arc::new(Identity::Anonymous),
            operation_id: None,
            params: HashMap::new(),
            query: HashMap::new(),
        }
    }

    /// Sets the resolved identity.
    #[must_use]
    pub fn with_identity(mut self, identity: Arc<Identity>) -> Self {
        self.identity = identity;
        self
    }

    /// Sets the operation ID of the matched route.
    #[must_use]
    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    /// Sets the path parameters extracted by the router.
    #[must_use]
    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    /// Sets the decoded query string parameters.
    #[must_use]
    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the caller identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the operation ID of the matched route, if any.
    #[must_use]
    pub fn operation_id(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    /// Returns a path parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns a query string parameter by name.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{AuthenticatedUser, Permissions, UserId};

    #[test]
    fn test_request_id_new_generates_unique_ids() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_request_ids_are_time_ordered() {
        let first = RequestId::new();
        let second = RequestId::new();
        assert!(first.as_uuid() < second.as_uuid());
    }

    #[test]
    fn test_request_context_defaults_to_anonymous() {
        let ctx = RequestContext::new(RequestId::new());
        assert!(ctx.identity().is_anonymous());
        assert!(ctx.operation_id().is_none());
        assert!(ctx.param("id").is_none());
    }

    #[test]
    fn test_request_context_builders() {
        let identity = Identity::User(AuthenticatedUser::new(
            UserId::new(7),
            Permissions::from_codes(["movies:read"]),
        ));
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());

        let ctx = RequestContext::new(RequestId::new())
            .with_identity(Arc::new(identity))
            .with_operation_id("showMovie")
            .with_params(params)
            .with_query(HashMap::from([("page".to_string(), "2".to_string())]));

        assert_eq!(ctx.operation_id(), Some("showMovie"));
        assert_eq!(ctx.param("id"), Some("42"));
        assert_eq!(ctx.query("page"), Some("2"));
        assert!(ctx.query("id").is_none());
        assert_eq!(ctx.identity().user_id(), Some(UserId::new(7)));
    }
}
