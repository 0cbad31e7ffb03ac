use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use tracing::{error, info, warn};

use jobflow_api::app::build_worker_app;
use jobflow_api::app::services::{WorkerRuntime, connect_broker};
use jobflow_api::shutdown::wait_for_shutdown_signal;
use jobflow_core::{Job, JobOutcome};
use jobflow_infra::config::Settings;
use jobflow_infra::jobs::handler_fn;

/// Demo workload: 2-5s of "work" with a 10% failure rate.
async fn simulated_work(job: Job) -> JobOutcome {
    let (work_ms, fails) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(2000..5000), rng.gen_bool(0.1))
    };
    tracing::debug!(job_id = %job.id, work_ms, "simulating work");
    tokio::time::sleep(Duration::from_millis(work_ms)).await;

    if fails {
        JobOutcome::retryable("Simulated processing failure")
    } else {
        JobOutcome::Success
    }
}

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

    let broker = connect_broker(&settings)
        .await
        .context("failed to connect to the queue broker")?;
    let runtime = WorkerRuntime::from_settings(&settings, broker, Arc::new(handler_fn(simulated_work)))
        .context("failed to set up metrics")?;

    let app = build_worker_app(runtime.services.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.worker_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("Worker service listening on port {}", settings.worker_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    if let Err(err) = runtime.shutdown().await {
        warn!(error = %err, "worker shut down before all jobs finished");
    }
    info!("Worker queue closed, terminating process");

    Ok(())
}
