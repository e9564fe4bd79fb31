//! Permission stage.
//!
//! Routes may name a permission code (`movies:read`, `movies:write`). The
//! [`PermissionGate`] decides whether the request's identity holds it:
//! anonymous callers are told to authenticate (401), inactive accounts and
//! missing codes are forbidden (403). Routes without a code pass through.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::pipeline::Stage;
use crate::types::{Request, Response, ResponseExt};
use cinegate_core::{GatewayError, GatewayResult, Identity};
use tracing::warn;

/// Set-membership check of permission codes.
///
/// # Example
///
/// ```
/// use cinegate_core::{AuthenticatedUser, Identity, Permissions, UserId};
/// use cinegate_middleware::stages::PermissionGate;
///
/// let gate = PermissionGate::new(true);
/// let reader = Identity::User(AuthenticatedUser::new(
///     UserId::new(1),
///     Permissions::from_codes(["movies:read"]),
/// ));
///
/// assert!(gate.allows(&reader, "movies:read"));
/// assert!(!gate.allows(&reader, "movies:write"));
/// assert!(!gate.allows(&Identity::Anonymous, "movies:read"));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PermissionGate {
    enforce: bool,
}

impl PermissionGate {
    /// Creates a gate. With `enforce == false` every check passes.
    #[must_use]
    pub const fn new(enforce: bool) -> Self {
        Self { enforce }
    }

    /// Whether checks are enforced.
    #[must_use]
    pub const fn is_enforced(&self) -> bool {
        self.enforce
    }

    /// Returns `true` exactly when [`require`](Self::require) passes, so an
    /// inactive account is refused even if it holds `code`.
    #[must_use]
    pub fn allows(&self, identity: &Identity, code: &str) -> bool {
        self.require(identity, code).is_ok()
    }

    /// Checks `code` against `identity`, explaining a denial.
    pub fn require(&self, identity: &Identity, code: &str) -> GatewayResult<()> {
        if !self.enforce {
            return Ok(());
        }
        match identity {
            Identity::Anonymous => Err(GatewayError::AuthenticationRequired),
            Identity::User(user) if !user.activated => Err(GatewayError::InactiveAccount),
            Identity::User(user) if !user.permissions.includes(code) => {
                Err(GatewayError::insufficient_permission(code))
            }
            Identity::User(_) => Ok(()),
        }
    }
}

impl Default for PermissionGate {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Middleware enforcing the route's permission code.
#[derive(Debug, Clone, Default)]
pub struct PermissionMiddleware {
    gate: PermissionGate,
}

impl PermissionMiddleware {
    /// Creates the stage.
    #[must_use]
    pub const fn new(gate: PermissionGate) -> Self {
        Self { gate }
    }
}

impl Middleware for PermissionMiddleware {
    fn name(&self) -> &'static str {
        Stage::Permission.name()
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if let Some(code) = ctx.required_permission() {
                if let Err(err) = self.gate.require(ctx.identity(), code) {
                    warn!(
                        request_id = %ctx.request_id(),
                        identity = %ctx.identity().log_id(),
                        permission = code,
                        error.kind = err.kind(),
                        path = %request.uri().path(),
                        "authorization denied"
                    );
                    return Response::from_gateway_error(&err);
                }
            }

            next.run(ctx, request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use cinegate_core::{AuthenticatedUser, Permissions, UserId};
    use http::{header, Request as HttpRequest, StatusCode};
    use http_body_util::Full;

    fn user(id: i64, codes: &[&str]) -> Identity {
        Identity::User(AuthenticatedUser::new(
            UserId::new(id),
            Permissions::from_codes(codes.iter().copied()),
        ))
    }

    #[test]
    fn test_disjoint_permission_sets() {
        let gate = PermissionGate::new(true);
        let reader = user(1, &["movies:read"]);
        let writer = user(2, &["movies:write"]);

        assert!(gate.require(&reader, "movies:read").is_ok());
        assert!(gate.require(&writer, "movies:write").is_ok());
        assert!(matches!(
            gate.require(&reader, "movies:write"),
            Err(GatewayError::InsufficientPermission { .. })
        ));
        assert!(matches!(
            gate.require(&writer, "movies:read"),
            Err(GatewayError::InsufficientPermission { .. })
        ));
    }

    #[test]
    fn test_allows_agrees_with_require_for_inactive_holder() {
        let gate = PermissionGate::new(true);
        let dormant = Identity::User(
            AuthenticatedUser::new(UserId::new(3), Permissions::from_codes(["movies:read"]))
                .with_activated(false),
        );

        assert!(!gate.allows(&dormant, "movies:read"));
        assert!(matches!(
            gate.require(&dormant, "movies:read"),
            Err(GatewayError::InactiveAccount)
        ));
        assert!(PermissionGate::new(false).allows(&dormant, "movies:read"));
    }

    #[test]
    fn test_anonymous_must_authenticate() {
        let gate = PermissionGate::default();
        let err = gate.require(&Identity::Anonymous, "movies:read").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_inactive_account_is_forbidden() {
        let gate = PermissionGate::default();
        let inactive = match user(1, &["movies:read"]) {
            Identity::User(u) => Identity::User(u.with_activated(false)),
            Identity::Anonymous => unreachable!(),
        };
        let err = gate.require(&inactive, "movies:read").unwrap_err();
        assert!(matches!(err, GatewayError::InactiveAccount));
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_unenforced_gate_always_passes() {
        let gate = PermissionGate::new(false);
        assert!(!gate.is_enforced());
        assert!(gate.require(&Identity::Anonymous, "movies:write").is_ok());
        assert!(gate.allows(&user(1, &[]), "movies:write"));
    }

    async fn run_stage(identity: Identity, required: Option<&str>) -> Response {
        let stage = PermissionMiddleware::new(PermissionGate::new(true));
        let mut ctx = MiddlewareContext::new();
        ctx.set_identity(identity);
        if let Some(code) = required {
            ctx.set_required_permission(code);
        }
        let request = HttpRequest::builder()
            .uri("/v1/movies")
            .body(Full::new(Bytes::new()))
            .unwrap();
        stage
            .process(
                &mut ctx,
                request,
                Next::handler(|_ctx, _req| Box::pin(async { Response::empty(StatusCode::OK) })),
            )
            .await
    }

    #[tokio::test]
    async fn test_stage_statuses() {
        assert_eq!(
            run_stage(Identity::Anonymous, None).await.status(),
            StatusCode::OK
        );

        let anonymous = run_stage(Identity::Anonymous, Some("movies:read")).await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(anonymous.headers()[header::WWW_AUTHENTICATE], "Bearer");

        assert_eq!(
            run_stage(user(1, &["movies:read"]), Some("movies:write"))
                .await
                .status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            run_stage(user(1, &["movies:read"]), Some("movies:read"))
                .await
                .status(),
            StatusCode::OK
        );
    }
}
