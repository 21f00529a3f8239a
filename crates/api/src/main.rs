use std::sync::Arc;

use anyhow::Context;

use recalc_api::app::{build_app, build_services};
use recalc_infra::RecalcConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    recalc_observability::init();

    let config = RecalcConfig::from_env().context("invalid configuration")?;
    if config.admin_token.is_none() {
        tracing::warn!("RECALC_ADMIN_TOKEN not set; admin endpoints are unauthenticated");
    }

    let services = Arc::new(build_services(&config).await?);
    let app = build_app(services.clone(), config.admin_token.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tokio::task::spawn_blocking(move || services.shutdown())
        .await
        .context("failed to stop background workers")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
