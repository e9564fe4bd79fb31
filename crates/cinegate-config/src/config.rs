//! Top-level configuration type.

use std::net::SocketAddr;

use cinegate_telemetry::LogFormat;
use serde::{Deserialize, Serialize};

use crate::{
    AuthConfig, ConfigError, CorsConfig, LoggingConfig, RateLimitConfig, ServerConfig, SmtpConfig,
};

/// Complete cinegate configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to layer files and environment
/// variables over the defaults.
///
/// # Example
///
/// ```
/// use cinegate_config::CinegateConfig;
///
/// let config = CinegateConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8000");
/// assert_eq!(config.limiter.burst, 4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CinegateConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-client rate limiting.
    #[serde(default)]
    pub limiter: RateLimitConfig,

    /// Authentication and permission checks.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Trusted CORS origins.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Outbound mail.
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CinegateConfig {
    /// Checks cross-field constraints the types cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "server.request_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::invalid_value(
                "server.max_body_bytes",
                "must be greater than zero",
            ));
        }

        if self.limiter.enabled {
            if !(self.limiter.rps.is_finite() && self.limiter.rps > 0.0) {
                return Err(ConfigError::invalid_value(
                    "limiter.rps",
                    "must be a positive number when the limiter is enabled",
                ));
            }
            if self.limiter.burst == 0 {
                return Err(ConfigError::invalid_value(
                    "limiter.burst",
                    "must be at least 1 when the limiter is enabled",
                ));
            }
        }
        if self.limiter.idle_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "limiter.idle_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.limiter.sweep_interval_secs == 0 {
            return Err(ConfigError::invalid_value(
                "limiter.sweep_interval_secs",
                "must be greater than zero",
            ));
        }

        for origin in &self.cors.trusted_origins {
            if origin.is_empty() || origin.ends_with('/') {
                return Err(ConfigError::invalid_value(
                    "cors.trusted_origins",
                    format!("'{origin}' must be non-empty and have no trailing slash"),
                ));
            }
        }

        if self.smtp.sender.trim().is_empty() {
            return Err(ConfigError::invalid_value("smtp.sender", "must not be empty"));
        }

        cinegate_telemetry::create_env_filter(&self.logging.level)
            .map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))?;

        Ok(())
    }

    /// Development preset: pretty, coloured debug logs.
    ///
    /// # Example
    ///
    /// ```
    /// use cinegate_config::CinegateConfig;
    ///
    /// let config = CinegateConfig::development();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.server.environment = "development".to_string();
        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.ansi = true;
        config
    }

    /// Production preset: JSON info logs.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.server.environment = "production".to_string();
        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;
        config.logging.ansi = false;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: ConfigError) -> String {
        match err {
            ConfigError::InvalidValue { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_presets() {
        let dev = CinegateConfig::development();
        assert_eq!(dev.logging.format, LogFormat::Pretty);
        assert!(dev.logging.ansi);

        let prod = CinegateConfig::production();
        assert_eq!(prod.server.environment, "production");
        assert_eq!(prod.logging.format, LogFormat::Json);
        assert!(prod.validate().is_ok());
    }

    #[test]
    fn test_invalid_address() {
        let mut config = CinegateConfig::default();
        config.server.http_addr = "localhost".to_string();
        assert_eq!(field_of(config.validate().unwrap_err()), "server.http_addr");
    }

    #[test]
    fn test_limiter_rules_only_apply_when_enabled() {
        let mut config = CinegateConfig::default();
        config.limiter.burst = 0;
        assert_eq!(field_of(config.validate().unwrap_err()), "limiter.burst");

        config.limiter.burst = 4;
        config.limiter.rps = f64::NAN;
        assert_eq!(field_of(config.validate().unwrap_err()), "limiter.rps");

        config.limiter.enabled = false;
        assert!(config.validate().is_ok());

        config.limiter.sweep_interval_secs = 0;
        assert_eq!(
            field_of(config.validate().unwrap_err()),
            "limiter.sweep_interval_secs"
        );
    }

    #[test]
    fn test_trusted_origin_rules() {
        let mut config = CinegateConfig::default();
        config.cors.trusted_origins = vec!["https://cinemago.example".to_string()];
        assert!(config.validate().is_ok());

        config.cors.trusted_origins.push("https://admin.cinemago.example/".to_string());
        assert_eq!(
            field_of(config.validate().unwrap_err()),
            "cors.trusted_origins"
        );
    }

    #[test]
    fn test_zero_body_limit_rejected() {
        let mut config = CinegateConfig::default();
        config.server.max_body_bytes = 0;
        assert_eq!(
            field_of(config.validate().unwrap_err()),
            "server.max_body_bytes"
        );
    }

    #[test]
    fn test_empty_sender_rejected() {
        let mut config = CinegateConfig::default();
        config.smtp.sender = "  ".to_string();
        assert_eq!(field_of(config.validate().unwrap_err()), "smtp.sender");
    }

    #[test]
    fn test_bad_log_directive_rejected() {
        let mut config = CinegateConfig::default();
        config.logging.level = "cinegate=[".to_string();
        assert_eq!(field_of(config.validate().unwrap_err()), "logging.level");
    }
}
