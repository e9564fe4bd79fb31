//! Configuration schema types.
//!
//! One struct per section. Every field has a default, so a file only needs
//! the keys it changes.

use std::time::Duration;

use cinegate_telemetry::{LogConfig, LogFormat};
use serde::{Deserialize, Serialize};

/// Server configuration section.
///
/// # Example
///
/// ```
/// use cinegate_config::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::default();
/// assert_eq!(config.http_addr, "0.0.0.0:8000");
/// assert_eq!(config.request_timeout(), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Deployment environment reported by the healthcheck.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Budget for reading the body and running the pipeline, in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// How long in-flight connections get to finish on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// How long shutdown waits for background tasks.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    /// Key rate limiting on `X-Forwarded-For` / `X-Real-IP`.
    #[serde(default)]
    pub trust_proxy_headers: bool,

    /// Largest request body accepted, in bytes. Bigger bodies get a 413.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl ServerConfig {
    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Connection shutdown timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Background drain timeout as a [`Duration`].
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            environment: default_environment(),
            request_timeout_ms: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            drain_timeout_secs: default_drain_timeout(),
            trust_proxy_headers: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_drain_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    5 * 1024 * 1024
}

/// Rate limiter section (`[limiter]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether admission control runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tokens added per second.
    #[serde(default = "default_rps")]
    pub rps: f64,

    /// Bucket capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Clients idle longer than this are forgotten.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How often the idle sweep runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl RateLimitConfig {
    /// Idle window as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Sweep period as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rps: default_rps(),
            burst: default_burst(),
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_rps() -> f64 {
    2.0
}

fn default_burst() -> u32 {
    4
}

fn default_idle_timeout() -> u64 {
    180
}

fn default_sweep_interval() -> u64 {
    60
}

/// Authentication and authorization section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// When `false`, routes accept any identity regardless of permission codes.
    #[serde(default = "default_true")]
    pub enforce_permissions: bool,

    /// Upper bound for each store lookup, in milliseconds.
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_ms: u64,
}

impl AuthConfig {
    /// Lookup timeout as a [`Duration`].
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enforce_permissions: true,
            lookup_timeout_ms: default_lookup_timeout(),
        }
    }
}

fn default_lookup_timeout() -> u64 {
    3_000
}

/// CORS section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    /// Origins echoed back in `Access-Control-Allow-Origin`.
    #[serde(default)]
    pub trusted_origins: Vec<String>,
}

/// Outbound mail section.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SmtpConfig {
    /// SMTP host.
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// SMTP port.
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// SMTP username.
    #[serde(default)]
    pub username: String,

    /// SMTP password.
    #[serde(default)]
    pub password: String,

    /// `From` header of outgoing mail.
    #[serde(default = "default_smtp_sender")]
    pub sender: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("sender", &self.sender)
            .finish()
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            sender: default_smtp_sender(),
        }
    }
}

fn default_smtp_host() -> String {
    "sandbox.smtp.mailtrap.io".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_smtp_sender() -> String {
    "CinemaGo <no-reply@cinmemago.net>".to_string()
}

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive (trace, debug, info, warn, error, or per-target).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include ANSI colour codes in output.
    #[serde(default)]
    pub ansi: bool,
}

impl LoggingConfig {
    /// Converts the section into the subscriber settings.
    pub fn to_log_config(&self) -> LogConfig {
        let base = match self.format {
            LogFormat::Json => LogConfig::production(),
            LogFormat::Pretty => LogConfig::development(),
        };
        LogConfig {
            level: self.level.clone(),
            ansi: self.ansi,
            ..base
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            ansi: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
