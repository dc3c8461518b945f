use std::sync::Arc;

use anyhow::Context;
use orderstream_api::app::{AppServices, build_app};
use orderstream_infra::MessagingConfig;

const ENV_HTTP_ADDR: &str = "ORDERSTREAM_HTTP_ADDR";
const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    orderstream_observability::init();

    let config = MessagingConfig::from_env().context("invalid messaging configuration")?;
    let services = Arc::new(AppServices::from_config(config).context("failed to set up event log")?);

    let addr = std::env::var(ENV_HTTP_ADDR).unwrap_or_else(|_| DEFAULT_HTTP_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        messaging = services.messaging_enabled(),
        "listening"
    );

    let app = build_app(services.clone());
    let signal_services = services.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
            // Live streams never end on their own; terminate them so connections can drain.
            signal_services.gateway.shutdown().await;
        })
        .await
        .context("server error")?;

    services.shutdown().await;
    Ok(())
}
