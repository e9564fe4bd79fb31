//! CinemaGo API server.
//!
//! Configuration comes from the defaults, then `cinegate.toml` (or the file
//! named by the first argument), then `.env`, then `CINEGATE__*` variables.

use std::sync::Arc;

use anyhow::Context;
use cinegate::app::{build_server, AppState};
use cinegate_config::ConfigLoader;
use cinegate_middleware::stages::install_panic_hook;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "cinegate.toml".to_string());

    let config = ConfigLoader::new()
        .with_defaults()
        .with_optional_file(&path)?
        .with_dotenv()?
        .with_env_prefix("CINEGATE")
        .load()
        .context("failed to load configuration")?;

    cinegate_telemetry::init_logging(&config.logging.to_log_config())
        .context("failed to initialize logging")?;
    install_panic_hook();

    tracing::info!(
        addr = %config.server.http_addr,
        environment = %config.server.environment,
        enforce_permissions = config.auth.enforce_permissions,
        limiter_enabled = config.limiter.enabled,
        "starting cinegate"
    );

    let state = Arc::new(AppState::from_config(&config));
    let server = build_server(&config, &state)?;
    let report = server.run().await?;

    tracing::info!(
        connections_drained = report.connections_drained,
        background_drained = report.drain.is_drained(),
        "cinegate stopped"
    );
    Ok(())
}
