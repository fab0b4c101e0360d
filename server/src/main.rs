use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use parley_config::load as load_config;
use parley_runtime::{shutdown_signal, telemetry};
use parley_server::build_application;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to set tracing subscriber")?;

    info!("starting Parley session server");

    let config = load_config().context("failed to load configuration")?;

    let (app, _services) = build_application(&config).await?;

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;

    info!("server shut down");
    Ok(())
}
