//! Rate limiting stage.
//!
//! Every client gets its own [`TokenBucket`]: `burst` tokens of capacity,
//! refilled continuously at `refill_rate` tokens per second, one token per
//! request. Buckets live in a [`ClientLimiterRegistry`], created on a
//! client's first request and evicted by a periodic sweep once the client has
//! been idle for `idle_timeout`.
//!
//! A denied request is answered with an empty 429 and never reaches the
//! handler.
//!
//! ## Locking
//!
//! The registry map sits behind one mutex, which covers lookup, insert and
//! the sweep's removal. Each bucket has its own mutex, so two different
//! clients only contend while the map is briefly locked.
//!
//! ## Example
//!
//! ```
//! use cinegate_middleware::stages::rate_limit::{ClientLimiterRegistry, LimiterConfig};
//!
//! let registry = ClientLimiterRegistry::new(LimiterConfig {
//!     burst: 2,
//!     ..LimiterConfig::default()
//! });
//! assert!(registry.allow("198.51.100.7"));
//! assert!(registry.allow("198.51.100.7"));
//! assert!(!registry.allow("198.51.100.7"));
//! assert!(registry.allow("198.51.100.8"));
//! ```

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::pipeline::Stage;
use crate::types::{Request, Response, ResponseExt};
use cinegate_core::GatewayError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Proxy header names consulted when proxy headers are trusted.
pub mod headers {
    /// Comma-separated client chain; the first entry is the client.
    pub const FORWARDED_FOR: &str = "x-forwarded-for";
    /// Single client address set by some proxies.
    pub const REAL_IP: &str = "x-real-ip";
}

/// Key used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// A continuously refilling token bucket.
///
/// There is no background timer: each call to
/// [`try_consume`](Self::try_consume) first credits the tokens earned since
/// the previous call, capped at capacity.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    updated_at: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    #[must_use]
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    fn new_at(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            tokens: capacity,
            refill_rate: refill_rate.max(0.0),
            updated_at: now,
        }
    }

    /// Refills, then takes one token if at least one is available.
    pub fn try_consume(&mut self) -> bool {
        self.try_consume_at(Instant::now())
    }

    /// [`try_consume`](Self::try_consume) against an explicit clock reading.
    ///
    /// A reading earlier than the last one credits nothing; the bucket's
    /// clock never moves backwards.
    pub fn try_consume_at(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.updated_at);
        self.tokens = elapsed
            .as_secs_f64()
            .mul_add(self.refill_rate, self.tokens)
            .min(self.capacity);
        if now > self.updated_at {
            self.updated_at = now;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens available as of the last refill.
    #[must_use]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Maximum tokens the bucket holds.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

/// Limiter settings.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// When `false`, every request is admitted.
    pub enabled: bool,
    /// Tokens credited per second.
    pub refill_rate: f64,
    /// Bucket capacity.
    pub burst: u32,
    /// How long a client may be idle before the sweep evicts it.
    pub idle_timeout: Duration,
    /// How often the sweep runs.
    pub sweep_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refill_rate: 2.0,
            burst: 4,
            idle_timeout: Duration::from_secs(180),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct ClientState {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Per-client buckets with idle eviction.
#[derive(Debug)]
pub struct ClientLimiterRegistry {
    config: LimiterConfig,
    clients: Mutex<HashMap<String, Arc<Mutex<ClientState>>>>,
}

impl ClientLimiterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the limiter settings.
    #[must_use]
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Admits or denies one request from `client`.
    ///
    /// A client seen for the first time starts with a full bucket.
    pub fn allow(&self, client: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        let state = {
            let mut clients = self.clients.lock();
            if let Some(state) = clients.get(client) {
                Arc::clone(state)
            } else {
                let state = Arc::new(Mutex::new(ClientState {
                    bucket: TokenBucket::new(self.config.burst, self.config.refill_rate),
                    last_seen: Instant::now(),
                }));
                clients.insert(client.to_owned(), Arc::clone(&state));
                state
            }
        };

        let mut state = state.lock();
        // Read the clock under the bucket lock so concurrent callers for the
        // same client observe non-decreasing timestamps.
        let now = Instant::now();
        state.last_seen = state.last_seen.max(now);
        state.bucket.try_consume_at(now)
    }

    /// Removes every client idle for at least `idle_timeout`.
    ///
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, state| {
            // An entry another thread is holding is in use right now.
            Arc::strong_count(state) > 1
                || now.saturating_duration_since(state.lock().last_seen) < idle_timeout
        });
        before - clients.len()
    }

    /// Number of tracked clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Whether no client is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Whether `client` is tracked.
    #[must_use]
    pub fn contains(&self, client: &str) -> bool {
        self.clients.lock().contains_key(client)
    }

    /// Sweeps every `sweep_interval` until `shutdown` resolves.
    ///
    /// Returns at once when the limiter is disabled.
    pub async fn run_sweeper<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if !self.config.enabled {
            return;
        }

        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    debug!("limiter sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let evicted = self.sweep();
                    if evicted > 0 {
                        debug!(evicted, remaining = self.len(), "evicted idle rate limit clients");
                    }
                }
            }
        }
    }
}

/// Derives the rate limit key for a request.
///
/// By default this is the peer IP. With `trust_proxy_headers` the first
/// `X-Forwarded-For` entry wins, then `X-Real-IP`, then the peer IP.
#[must_use]
pub fn client_key(ctx: &MiddlewareContext, request: &Request, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        if let Some(forwarded) = forwarded_client(request) {
            return forwarded.to_owned();
        }
    }

    ctx.client_addr()
        .map_or_else(|| UNKNOWN_CLIENT.to_owned(), |addr| addr.ip().to_string())
}

fn forwarded_client(request: &Request) -> Option<&str> {
    let header_value = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
    };

    header_value(headers::FORWARDED_FOR)
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|client| !client.is_empty())
        .or_else(|| {
            header_value(headers::REAL_IP)
                .map(str::trim)
                .filter(|client| !client.is_empty())
        })
}

/// Middleware admitting requests through a shared [`ClientLimiterRegistry`].
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    registry: Arc<ClientLimiterRegistry>,
    trust_proxy_headers: bool,
}

impl RateLimitMiddleware {
    /// Creates the stage over a shared registry.
    #[must_use]
    pub fn new(registry: Arc<ClientLimiterRegistry>) -> Self {
        Self {
            registry,
            trust_proxy_headers: false,
        }
    }

    /// Keys clients by proxy headers instead of the peer address.
    #[must_use]
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    /// Returns the shared registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ClientLimiterRegistry> {
        &self.registry
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        Stage::RateLimit.name()
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let client = client_key(ctx, &request, self.trust_proxy_headers);
            if !self.registry.allow(&client) {
                warn!(
                    request_id = %ctx.request_id(),
                    client = %client,
                    path = %request.uri().path(),
                    "rate limit exceeded"
                );
                return Response::from_gateway_error(&GatewayError::RateLimited);
            }

            next.run(ctx, request).await
        })
    }
}
