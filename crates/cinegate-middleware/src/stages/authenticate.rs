//! Authentication stage.
//!
//! Resolves the `Authorization` header to an [`Identity`]:
//!
//! - no header: [`Identity::Anonymous`]
//! - anything other than `Bearer <24 url-safe characters>`: `MalformedCredential`
//! - a token whose hash matches no active authentication token: `InvalidCredential`
//! - otherwise the owning user, with their permission codes
//!
//! The three credential failures are logged by kind but answered identically
//! (401, `WWW-Authenticate: Bearer`, same body). Store lookups are bounded by
//! the request deadline; running out of time is `UpstreamTimeout` (503), not a
//! credential failure.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::pipeline::Stage;
use crate::types::{Request, Response, ResponseExt};
use chrono::Utc;
use cinegate_core::{
    AuthenticatedUser, GatewayError, GatewayResult, Identity, PermissionStore, PlaintextToken,
    TokenScope, TokenStore, UserStore,
};
use http::{header, HeaderMap, HeaderValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Scheme prefix of an accepted `Authorization` header.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Default upper bound on each store round trip.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Resolves bearer tokens against the token, permission and (optionally)
/// user stores.
///
/// # Example
///
/// ```
/// use cinegate_core::memory::MemoryStore;
/// use cinegate_core::TokenScope;
/// use cinegate_middleware::stages::authenticate::Authenticator;
/// use http::{header, HeaderMap, HeaderValue};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let store = Arc::new(MemoryStore::new());
/// let user = store.create_user(true);
/// store.grant(user, ["movies:read"]);
/// let token = store.issue_token(user, chrono::Duration::hours(1), TokenScope::Authentication);
///
/// let authenticator = Authenticator::new(store.clone(), store.clone());
/// let mut headers = HeaderMap::new();
/// headers.insert(
///     header::AUTHORIZATION,
///     HeaderValue::from_str(&format!("Bearer {}", token.as_str())).unwrap(),
/// );
///
/// let identity = authenticator.authenticate(&headers, None).await.unwrap();
/// assert_eq!(identity.user_id(), Some(user));
/// assert!(identity.has_permission("movies:read"));
/// # });
/// ```
#[derive(Clone)]
pub struct Authenticator {
    tokens: Arc<dyn TokenStore>,
    permissions: Arc<dyn PermissionStore>,
    users: Option<Arc<dyn UserStore>>,
    lookup_timeout: Duration,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("users", &self.users.is_some())
            .field("lookup_timeout", &self.lookup_timeout)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Creates an authenticator over a token store and a permission store.
    pub fn new(tokens: Arc<dyn TokenStore>, permissions: Arc<dyn PermissionStore>) -> Self {
        Self {
            tokens,
            permissions,
            users: None,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Also loads the user record, so identities carry the activation flag
    /// and tokens of deleted users stop working.
    #[must_use]
    pub fn with_users(mut self, users: Arc<dyn UserStore>) -> Self {
        self.users = Some(users);
        self
    }

    /// Bounds each store round trip, in addition to the request deadline.
    #[must_use]
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Resolves the request headers to an identity.
    ///
    /// `deadline` is the request deadline, if any; every store call must
    /// finish before it.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        deadline: Option<Instant>,
    ) -> GatewayResult<Identity> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Ok(Identity::Anonymous);
        };
        let token = parse_bearer(value)?;

        let record = self
            .bounded(
                deadline,
                "token lookup",
                self.tokens
                    .find_active_token(&token.hash(), TokenScope::Authentication),
            )
            .await?
            .ok_or(GatewayError::InvalidCredential)?;

        // The store is trusted to filter, but a lax implementation must not
        // turn into an authentication bypass.
        if record.scope != TokenScope::Authentication {
            return Err(GatewayError::InvalidCredential);
        }
        if Utc::now() >= record.expiry {
            return Err(GatewayError::ExpiredCredential);
        }

        let activated = match &self.users {
            Some(users) => {
                self.bounded(deadline, "user lookup", users.find_user(record.user_id))
                    .await?
                    .ok_or(GatewayError::InvalidCredential)?
                    .activated
            }
            None => true,
        };

        let permissions = self
            .bounded(
                deadline,
                "permission lookup",
                self.permissions.permissions_for(record.user_id),
            )
            .await?;

        Ok(Identity::User(
            AuthenticatedUser::new(record.user_id, permissions).with_activated(activated),
        ))
    }

    async fn bounded<T, F>(
        &self,
        deadline: Option<Instant>,
        operation: &'static str,
        lookup: F,
    ) -> GatewayResult<T>
    where
        F: Future<Output = Result<T, cinegate_core::StoreError>>,
    {
        let budget = Instant::now() + self.lookup_timeout;
        let until = deadline.map_or(budget, |deadline| deadline.min(budget));
        match tokio::time::timeout_at(until, lookup).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GatewayError::upstream_timeout(operation)),
        }
    }
}

fn parse_bearer(value: &HeaderValue) -> GatewayResult<PlaintextToken> {
    let value = value
        .to_str()
        .map_err(|_| GatewayError::malformed_credential("authorization header is not visible ASCII"))?;
    let token = value
        .strip_prefix(BEARER_PREFIX)
        .ok_or_else(|| GatewayError::malformed_credential("authorization scheme is not Bearer"))?;
    PlaintextToken::parse(token)
        .ok_or_else(|| GatewayError::malformed_credential("bearer token has the wrong shape"))
}

/// Middleware attaching the caller identity to the context.
///
/// Adds `Vary: Authorization` to every response it returns.
#[derive(Debug, Clone)]
pub struct AuthenticateMiddleware {
    authenticator: Arc<Authenticator>,
}

impl AuthenticateMiddleware {
    /// Creates the stage.
    #[must_use]
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl Middleware for AuthenticateMiddleware {
    fn name(&self) -> &'static str {
        Stage::Authenticate.name()
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let outcome = self
                .authenticator
                .authenticate(request.headers(), ctx.deadline())
                .await;

            let mut response = match outcome {
                Ok(identity) => {
                    debug!(
                        request_id = %ctx.request_id(),
                        identity = %identity.log_id(),
                        "request authenticated"
                    );
                    ctx.set_identity(identity);
                    next.run(ctx, request).await
                }
                Err(err) => {
                    match &err {
                        GatewayError::UpstreamTimeout { .. } | GatewayError::Store(_) => error!(
                            request_id = %ctx.request_id(),
                            error.kind = err.kind(),
                            error = %err,
                            "authentication lookup failed"
                        ),
                        _ => warn!(
                            request_id = %ctx.request_id(),
                            error.kind = err.kind(),
                            error = %err,
                            path = %request.uri().path(),
                            "authentication failed"
                        ),
                    }
                    Response::from_gateway_error(&err)
                }
            };

            response
                .headers_mut()
                .append(header::VARY, HeaderValue::from_static("Authorization"));
            response
        })
    }
}
