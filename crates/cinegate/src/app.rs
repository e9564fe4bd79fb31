//! Application state and server assembly.

use std::future::Future;
use std::sync::Arc;

use cinegate_config::CinegateConfig;
use cinegate_core::memory::MemoryStore;
use cinegate_core::RequestContext;
use cinegate_middleware::stages::{
    Authenticator, ClientLimiterRegistry, LimiterConfig, PermissionGate,
};
use cinegate_middleware::Response;
use cinegate_server::{BoxedHandlerResult, Server, ServerBuilder, ServerConfig, ServerError};
use cinegate_tasks::BackgroundTasks;
use http::Method;

use crate::accounts::AccountDirectory;
use crate::catalog::MovieCatalog;
use crate::error::{AppError, AppResult};
use crate::handlers::{health, movies, tokens, users, MOVIES_READ, MOVIES_WRITE};
use crate::mailer::{LogMailer, Mailer};

/// Everything handlers share.
pub struct AppState {
    /// Deployment environment reported by the healthcheck.
    pub environment: String,
    /// Users, tokens and permissions read by the gateway.
    pub store: Arc<MemoryStore>,
    /// Movies.
    pub catalog: MovieCatalog,
    /// User profiles.
    pub accounts: AccountDirectory,
    /// Outbound mail.
    pub mailer: Arc<dyn Mailer>,
    /// Work that outlives its request.
    pub tasks: BackgroundTasks,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("environment", &self.environment)
            .field("movies", &self.catalog.len())
            .field("accounts", &self.accounts.len())
            .field("tasks_in_flight", &self.tasks.in_flight())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates empty state with the given mailer.
    pub fn new(environment: impl Into<String>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            environment: environment.into(),
            store: Arc::new(MemoryStore::new()),
            catalog: MovieCatalog::new(),
            accounts: AccountDirectory::new(),
            mailer,
            tasks: BackgroundTasks::new(),
        }
    }

    /// Creates empty state for `config`, mailing through a [`LogMailer`].
    pub fn from_config(config: &CinegateConfig) -> Self {
        Self::new(
            config.server.environment.clone(),
            Arc::new(LogMailer::new(&config.smtp)),
        )
    }
}

/// Adapts an application handler to the registry signature: binds the
/// shared state and renders [`AppError`]s.
fn with_state<Req, F, Fut>(
    state: &Arc<AppState>,
    handler: F,
) -> impl Fn(RequestContext, Req) -> BoxedHandlerResult + Send + Sync + 'static
where
    Req: Send + 'static,
    F: Fn(Arc<AppState>, RequestContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<Response>> + Send + 'static,
{
    let state = Arc::clone(state);
    move |ctx: RequestContext, input: Req| -> BoxedHandlerResult {
        let fut = handler(Arc::clone(&state), ctx, input);
        Box::pin(async move { fut.await.or_else(AppError::into_gateway_result) })
    }
}

/// Maps the `[limiter]` section onto the registry settings.
pub fn limiter_config(config: &CinegateConfig) -> LimiterConfig {
    LimiterConfig {
        enabled: config.limiter.enabled,
        refill_rate: config.limiter.rps,
        burst: config.limiter.burst,
        idle_timeout: config.limiter.idle_timeout(),
        sweep_interval: config.limiter.sweep_interval(),
    }
}

/// Registers every route and handler on `builder`.
pub fn routes(builder: ServerBuilder, state: &Arc<AppState>) -> ServerBuilder {
    builder
        .route(Method::GET, "/v1/healthcheck", "healthcheck")
        .protected_route(Method::GET, "/v1/movies", "listMovies", MOVIES_READ)
        .protected_route(Method::POST, "/v1/movies", "createMovie", MOVIES_WRITE)
        .protected_route(Method::GET, "/v1/movies/{id}", "showMovie", MOVIES_READ)
        .protected_route(Method::PATCH, "/v1/movies/{id}", "updateMovie", MOVIES_WRITE)
        .protected_route(Method::DELETE, "/v1/movies/{id}", "deleteMovie", MOVIES_WRITE)
        .route(Method::POST, "/v1/users", "registerUser")
        .route(Method::PUT, "/v1/users/activated", "activateUser")
        .route(Method::POST, "/v1/tokens/authentication", "createAuthenticationToken")
        .handler("healthcheck", with_state(state, health::healthcheck))
        .handler("listMovies", with_state(state, movies::list))
        .json_handler("createMovie", with_state(state, movies::create))
        .handler("showMovie", with_state(state, movies::show))
        .json_handler("updateMovie", with_state(state, movies::update))
        .handler("deleteMovie", with_state(state, movies::delete))
        .json_handler("registerUser", with_state(state, users::register))
        .json_handler("activateUser", with_state(state, users::activate))
        .json_handler(
            "createAuthenticationToken",
            with_state(state, tokens::create_authentication_token),
        )
}

/// Builds the server for `config` over `state`.
pub fn build_server(config: &CinegateConfig, state: &Arc<AppState>) -> Result<Server, ServerError> {
    let server_config = ServerConfig::builder()
        .http_addr(config.server.http_addr.clone())
        .request_timeout(config.server.request_timeout())
        .shutdown_timeout(config.server.shutdown_timeout())
        .drain_timeout(config.server.drain_timeout())
        .trust_proxy_headers(config.server.trust_proxy_headers)
        .max_body_bytes(config.server.max_body_bytes)
        .build();

    let authenticator = Authenticator::new(state.store.clone(), state.store.clone())
        .with_users(state.store.clone())
        .with_lookup_timeout(config.auth.lookup_timeout());

    let mut builder = Server::builder()
        .config(server_config)
        .authenticator(Arc::new(authenticator))
        .permission_gate(PermissionGate::new(config.auth.enforce_permissions))
        .trusted_origins(config.cors.trusted_origins.iter().cloned())
        .background_tasks(state.tasks.clone());
    if config.limiter.enabled {
        builder = builder.rate_limiter(Arc::new(ClientLimiterRegistry::new(limiter_config(
            config,
        ))));
    }

    routes(builder, state).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_config_maps_rps() {
        let mut config = CinegateConfig::default();
        config.limiter.rps = 7.5;
        config.limiter.burst = 12;
        let limiter = limiter_config(&config);
        assert!((limiter.refill_rate - 7.5).abs() < f64::EPSILON);
        assert_eq!(limiter.burst, 12);
        assert_eq!(limiter.idle_timeout, config.limiter.idle_timeout());
    }

    #[tokio::test]
    async fn test_build_server_registers_every_route() {
        let config = CinegateConfig::default();
        let state = Arc::new(AppState::from_config(&config));
        let server = build_server(&config, &state).unwrap();
        assert_eq!(server.router().route_count(), 9);
        assert_eq!(
            server.pipeline().stage_names(),
            ["recover", "cors", "rate_limit", "authenticate", "permission"]
        );
    }

    #[tokio::test]
    async fn test_disabled_limiter_drops_stage() {
        let mut config = CinegateConfig::default();
        config.limiter.enabled = false;
        let state = Arc::new(AppState::from_config(&config));
        let server = build_server(&config, &state).unwrap();
        assert!(!server.pipeline().stage_names().contains(&"rate_limit"));
    }
}
