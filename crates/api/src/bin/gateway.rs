use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use jobflow_api::GATEWAY_SERVICE;
use jobflow_api::app::build_gateway_app;
use jobflow_api::app::services::GatewayServices;
use jobflow_api::shutdown::wait_for_shutdown_signal;
use jobflow_api::upstream::WorkerClient;
use jobflow_infra::config::Settings;
use jobflow_observability::Telemetry;

async fn shutdown_signal() {
    if let Err(err) = wait_for_shutdown_signal().await {
        error!(error = %err, "failed to install signal handlers");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;
    jobflow_observability::init(settings.log_format);

    let telemetry = Telemetry::new(GATEWAY_SERVICE).context("failed to set up metrics")?;
    let worker = WorkerClient::new(settings.worker_url.clone(), settings.upstream_timeout)
        .context("failed to build worker client")?;
    let app = build_gateway_app(Arc::new(GatewayServices::new(worker, telemetry)));

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(worker_url = %settings.worker_url, "API service listening on port {}", settings.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("Process terminated");
    Ok(())
}
