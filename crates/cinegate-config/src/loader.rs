//! Layered configuration loading.
//!
//! Layers apply in call order, each overriding only the keys it names:
//!
//! 1. A preset ([`with_defaults`](ConfigLoader::with_defaults),
//!    [`with_development`](ConfigLoader::with_development),
//!    [`with_production`](ConfigLoader::with_production))
//! 2. Files and strings (TOML or JSON)
//! 3. Environment variables `PREFIX__SECTION__KEY`, with `.env` entries
//!    underneath the real environment
//!
//! Layers are merged as JSON trees and deserialized once more at the end, so
//! a file that sets `[limiter] burst = 10` keeps every other limiter default.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use serde_json::{Number, Value};

use crate::{CinegateConfig, ConfigError};

/// Configuration loader with a layered approach.
///
/// # Example
///
/// ```no_run
/// use cinegate_config::ConfigLoader;
///
/// # fn main() -> Result<(), cinegate_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_production()
///     .with_optional_file("cinegate.toml")?
///     .with_dotenv()?
///     .with_env_prefix("CINEGATE")
///     .load()?;
///
/// println!("listening on {}", config.server.http_addr);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: CinegateConfig,
    env_prefix: Option<String>,
    dotenv: BTreeMap<String, String>,
    env_source: Option<Vec<(String, String)>>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader starting from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CinegateConfig::default(),
            env_prefix: None,
            dotenv: BTreeMap::new(),
            env_source: None,
        }
    }

    /// Reset to the default values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = CinegateConfig::default();
        self
    }

    /// Reset to the development preset.
    ///
    /// # Example
    ///
    /// ```
    /// use cinegate_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = CinegateConfig::development();
        self
    }

    /// Reset to the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = CinegateConfig::production();
        self
    }

    /// Merge a file, TOML or JSON by extension.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing or unreadable, has an
    /// unsupported extension, does not parse, or names unknown keys.
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        self.with_string(&content, format)
    }

    /// Merge a file if it exists.
    ///
    /// # Errors
    ///
    /// As [`with_file`](Self::with_file), except that a missing file is not
    /// an error.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merge configuration text in `format` ("toml" or "json").
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the format is unsupported, the text does not
    /// parse, or it names unknown keys.
    ///
    /// # Example
    ///
    /// ```
    /// use cinegate_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[limiter]\nburst = 10", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.limiter.burst, 10);
    /// assert!((config.limiter.rps - 2.0).abs() < f64::EPSILON);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let overlay: Value = match format.to_lowercase().as_str() {
            "toml" => {
                toml::from_str::<CinegateConfig>(content)?;
                toml::from_str(content)?
            }
            "json" => {
                serde_json::from_str::<CinegateConfig>(content)?;
                serde_json::from_str(content)?
            }
            _ => return Err(ConfigError::unsupported_format(format)),
        };

        let mut tree = serde_json::to_value(&self.config)?;
        merge(&mut tree, overlay);
        self.config = serde_json::from_value(tree)?;
        Ok(self)
    }

    /// Set the environment variable prefix.
    ///
    /// Variables use the form `PREFIX__SECTION__KEY`, e.g.
    /// `CINEGATE__LIMITER__BURST=10` or
    /// `CINEGATE__CORS__TRUSTED_ORIGINS=https://a.example,https://b.example`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Read variables from these pairs instead of the process environment.
    #[must_use]
    pub fn with_env_source<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_source = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Read the nearest `.env` file, if there is one.
    ///
    /// Entries sit under the environment: a variable set in both places
    /// takes the environment's value. The process environment is not
    /// modified.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Dotenv`] if a `.env` file exists but does not
    /// parse.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv_iter() {
            Ok(iter) => self.absorb_dotenv(iter),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a specific dotenv file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Dotenv`] if the file is missing or does not
    /// parse.
    pub fn with_dotenv_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let iter = dotenvy::from_path_iter(path)?;
        self.absorb_dotenv(iter)
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override does not parse or names an
    /// unknown key, or if validation fails.
    pub fn load(self) -> Result<CinegateConfig, ConfigError> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides without validating.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override does not parse or names an
    /// unknown key.
    pub fn load_unvalidated(mut self) -> Result<CinegateConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }
        Ok(self.config)
    }

    fn absorb_dotenv<I>(mut self, iter: I) -> Result<Self, ConfigError>
    where
        I: Iterator<Item = Result<(String, String), dotenvy::Error>>,
    {
        for item in iter {
            let (key, value) = item?;
            self.dotenv.insert(key, value);
        }
        Ok(self)
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let mut vars = std::mem::take(&mut self.dotenv);
        match self.env_source.take() {
            Some(source) => vars.extend(source),
            None => vars.extend(
                env::vars_os()
                    .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
            ),
        }

        let marker = format!("{prefix}__");
        let mut tree = serde_json::to_value(&self.config)?;
        for (key, value) in vars.iter().filter(|(k, _)| k.starts_with(&marker)) {
            apply_env_var(&mut tree, key, &key[marker.len()..], value)?;
        }
        self.config = serde_json::from_value(tree)?;

        Ok(())
    }
}

fn apply_env_var(tree: &mut Value, var: &str, path: &str, raw: &str) -> Result<(), ConfigError> {
    let pointer = path
        .split("__")
        .map(str::to_lowercase)
        .fold(String::new(), |acc, part| acc + "/" + &part);

    let slot = tree
        .pointer_mut(&pointer)
        .filter(|slot| !slot.is_object())
        .ok_or_else(|| ConfigError::unknown_key(var))?;

    let replacement = match &*slot {
        Value::Bool(_) => Value::Bool(
            parse_bool(raw).ok_or_else(|| ConfigError::env_parse_error(var, "expected boolean"))?,
        ),
        Value::Number(n) if n.is_u64() => Value::Number(
            raw.parse::<u64>()
                .map_err(|_| ConfigError::env_parse_error(var, "expected unsigned integer"))?
                .into(),
        ),
        Value::Number(_) => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| ConfigError::env_parse_error(var, "expected number"))?,
        Value::Array(_) => Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        ),
        _ => Value::String(raw.to_string()),
    };
    *slot = replacement;

    Ok(())
}

fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegate_telemetry::LogFormat;

    fn env(pairs: &[(&str, &str)]) -> ConfigLoader {
        ConfigLoader::new()
            .with_env_prefix("CINEGATE")
            .with_env_source(pairs.iter().copied())
    }

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, CinegateConfig::default());
    }

    #[test]
    fn test_presets_survive_partial_layers() {
        let config = ConfigLoader::new()
            .with_development()
            .with_string("[server]\nhttp_addr = \"127.0.0.1:9000\"", "toml")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.server.http_addr, "127.0.0.1:9000");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_later_layers_win() {
        let config = ConfigLoader::new()
            .with_string(r#"{"limiter": {"burst": 8, "rps": 5.0}}"#, "json")
            .unwrap()
            .with_string("[limiter]\nburst = 16", "toml")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.limiter.burst, 16);
        assert!((config.limiter.rps - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = ConfigLoader::new()
            .with_string("[server]\nport = 8000", "toml")
            .unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));

        let err = ConfigLoader::new()
            .with_string(r#"{"metrics": {}}"#, "json")
            .unwrap_err();
        assert!(matches!(err, ConfigError::JsonError(_)));
    }

    #[test]
    fn test_unsupported_format() {
        let err = ConfigLoader::new().with_string("a: 1", "yaml").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_env_overrides_by_type() {
        let config = env(&[
            ("CINEGATE__SERVER__HTTP_ADDR", "127.0.0.1:7000"),
            ("CINEGATE__SERVER__TRUST_PROXY_HEADERS", "yes"),
            ("CINEGATE__LIMITER__BURST", "12"),
            ("CINEGATE__LIMITER__RPS", "0.5"),
            ("CINEGATE__CORS__TRUSTED_ORIGINS", "https://a.example, https://b.example"),
            ("CINEGATE__LOGGING__FORMAT", "pretty"),
            ("OTHER__SERVER__HTTP_ADDR", "ignored"),
        ])
        .load()
        .unwrap();

        assert_eq!(config.server.http_addr, "127.0.0.1:7000");
        assert!(config.server.trust_proxy_headers);
        assert_eq!(config.limiter.burst, 12);
        assert!((config.limiter.rps - 0.5).abs() < f64::EPSILON);
        assert_eq!(
            config.cors.trusted_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_env_parse_errors() {
        let err = env(&[("CINEGATE__LIMITER__BURST", "many")]).load().unwrap_err();
        assert!(matches!(err, ConfigError::EnvParseError { .. }));

        let err = env(&[("CINEGATE__AUTH__ENFORCE_PERMISSIONS", "maybe")])
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvParseError { .. }));
    }

    #[test]
    fn test_env_unknown_key() {
        let err = env(&[("CINEGATE__SERVER__PORT", "80")]).load().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { var } if var == "CINEGATE__SERVER__PORT"));

        let err = env(&[("CINEGATE__SERVER", "x")]).load().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { .. }));
    }

    #[test]
    fn test_env_is_validated() {
        let err = env(&[("CINEGATE__LIMITER__BURST", "0")]).load().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "limiter.burst"));

        let config = env(&[("CINEGATE__LIMITER__BURST", "0")])
            .load_unvalidated()
            .unwrap();
        assert_eq!(config.limiter.burst, 0);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nope"), None);
    }
}
