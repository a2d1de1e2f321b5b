use std::sync::Arc;

use anyhow::Context;

use certgate_api::app::{build_app, services::build_services};
use certgate_infra::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    certgate_observability::init();

    let config = GatewayConfig::from_env().context("loading gateway configuration")?;
    let services = build_services(&config).await.context("wiring gateway services")?;

    let app = build_app(Arc::new(services.app));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    let stats = services.refresh.stats();
    tracing::info!(invalidations = ?stats.invalidations, uptime_secs = stats.uptime_secs, "cache refresh totals");
    services.refresh.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown requested");
}
