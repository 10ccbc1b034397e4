//! Branch risk clustering service: binary entrypoint.
//! Boots the Axum HTTP server with the calibration resolved from env/config.

use branch_risk_clustering::{app, EngineConfig};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("branch_risk_clustering=info,warn"));

    // Shuttle may already have installed a subscriber; keep theirs if so.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = EngineConfig::from_env().map_err(shuttle_runtime::Error::Custom)?;
    let router = app(&cfg).map_err(shuttle_runtime::Error::Custom)?;

    Ok(router.into())
}
