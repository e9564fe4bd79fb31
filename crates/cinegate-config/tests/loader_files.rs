//! Loading configuration from files on disk.

use std::io::Write;

use cinegate_config::{ConfigError, ConfigLoader, LogFormat};
use tempfile::{Builder, TempDir};

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn test_toml_file() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "cinegate.toml",
        r#"
            [server]
            http_addr = "127.0.0.1:4000"
            environment = "staging"

            [limiter]
            burst = 20

            [cors]
            trusted_origins = ["https://cinemago.example"]

            [logging]
            format = "pretty"
        "#,
    );

    let config = ConfigLoader::new().with_file(&path).unwrap().load().unwrap();
    assert_eq!(config.server.http_addr, "127.0.0.1:4000");
    assert_eq!(config.server.environment, "staging");
    assert_eq!(config.limiter.burst, 20);
    assert_eq!(config.limiter.idle_timeout_secs, 180);
    assert_eq!(config.cors.trusted_origins, vec!["https://cinemago.example"]);
    assert_eq!(config.logging.format, LogFormat::Pretty);
}

#[test]
fn test_json_file() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "cinegate.json",
        r#"{"auth": {"enforce_permissions": false}, "smtp": {"port": 2525}}"#,
    );

    let config = ConfigLoader::new().with_file(&path).unwrap().load().unwrap();
    assert!(!config.auth.enforce_permissions);
    assert_eq!(config.smtp.port, 2525);
}

#[test]
fn test_missing_and_optional_files() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");

    let err = ConfigLoader::new().with_file(&missing).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));

    let config = ConfigLoader::new()
        .with_optional_file(&missing)
        .unwrap()
        .load()
        .unwrap();
    assert_eq!(config.server.http_addr, "0.0.0.0:8000");
}

#[test]
fn test_unsupported_extension() {
    let file = Builder::new().suffix(".yaml").tempfile().unwrap();
    let err = ConfigLoader::new().with_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
}

#[test]
fn test_invalid_file_value_fails_validation() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "bad.toml", "[cors]\ntrusted_origins = [\"https://a.example/\"]");

    let err = ConfigLoader::new().with_file(&path).unwrap().load().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "cors.trusted_origins"));
}

#[test]
fn test_dotenv_sits_under_environment() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        ".env",
        "CINEGATE__LIMITER__BURST=9\nCINEGATE__SMTP__USERNAME=mailer\n",
    );

    let config = ConfigLoader::new()
        .with_dotenv_file(&path)
        .unwrap()
        .with_env_prefix("CINEGATE")
        .with_env_source([("CINEGATE__LIMITER__BURST", "3")])
        .load()
        .unwrap();

    assert_eq!(config.limiter.burst, 3);
    assert_eq!(config.smtp.username, "mailer");
}

#[test]
fn test_file_then_env() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "cinegate.toml", "[server]\ndrain_timeout_secs = 5");

    let config = ConfigLoader::new()
        .with_production()
        .with_file(&path)
        .unwrap()
        .with_env_prefix("cinegate")
        .with_env_source([("CINEGATE__SERVER__DRAIN_TIMEOUT_SECS", "12")])
        .load()
        .unwrap();

    assert_eq!(config.server.drain_timeout_secs, 12);
    assert_eq!(config.server.environment, "production");
}
