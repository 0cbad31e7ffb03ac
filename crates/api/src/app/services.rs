//! Infrastructure wiring: broker, event bus, engine and subscribers.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

use jobflow_core::JobOptions;
use jobflow_events::EventBus;
use jobflow_infra::JobEventBus;
use jobflow_infra::broker::{BrokerError, InMemoryBroker, QueueBroker};
use jobflow_infra::config::Settings;
use jobflow_infra::gateway::JobSubmissionGateway;
use jobflow_infra::health::HealthTracker;
use jobflow_infra::jobs::{EngineError, JobEngine, JobEngineConfig, JobEngineHandle, JobHandler};
use jobflow_infra::subscribers::{spawn_log_subscriber, spawn_telemetry_subscriber};
use jobflow_observability::{MetricsError, Telemetry};

use crate::upstream::WorkerClient;

/// Process start, for `uptime` and the initial `lastProcessed`.
#[derive(Debug, Clone, Copy)]
pub struct StartedAt {
    pub instant: Instant,
    pub wall: DateTime<Utc>,
}

impl StartedAt {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> f64 {
        self.instant.elapsed().as_secs_f64()
    }
}

/// Shared state of the worker's HTTP surface.
pub struct WorkerServices {
    pub gateway: JobSubmissionGateway<Arc<JobEventBus>>,
    pub broker: Arc<dyn QueueBroker>,
    pub health: HealthTracker,
    pub telemetry: Telemetry,
    pub started_at: StartedAt,
}

/// Shared state of the gateway's HTTP surface.
pub struct GatewayServices {
    pub worker: WorkerClient,
    pub telemetry: Telemetry,
    pub started_at: StartedAt,
}

impl GatewayServices {
    pub fn new(worker: WorkerClient, telemetry: Telemetry) -> Self {
        Self {
            worker,
            telemetry,
            started_at: StartedAt::now(),
        }
    }
}

/// Broker selected by settings: Redis when `REDIS_URL` is set, otherwise
/// in-memory.
pub async fn connect_broker(settings: &Settings) -> Result<Arc<dyn QueueBroker>, BrokerError> {
    match settings.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => {
            let broker = jobflow_infra::broker::RedisBroker::connect(url, &settings.queue_name).await?;
            info!(queue = %settings.queue_name, "using redis broker");
            Ok(Arc::new(broker))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            tracing::warn!("REDIS_URL is set but redis support is not compiled in; using in-memory broker");
            Ok(Arc::new(InMemoryBroker::new()))
        }
        None => {
            info!("REDIS_URL not set; using in-memory broker");
            Ok(Arc::new(InMemoryBroker::new()))
        }
    }
}

/// A running worker: HTTP state plus the engine behind it.
pub struct WorkerRuntime {
    pub services: Arc<WorkerServices>,
    pub bus: Arc<JobEventBus>,
    engine: JobEngineHandle,
}

impl WorkerRuntime {
    /// Wire the bus subscribers (health, telemetry, logs) and start the engine.
    pub fn start(
        broker: Arc<dyn QueueBroker>,
        handler: Arc<dyn JobHandler>,
        options: JobOptions,
        engine_config: JobEngineConfig,
        telemetry: Telemetry,
    ) -> Self {
        let bus = Arc::new(JobEventBus::new());
        let health = HealthTracker::new();

        // Subscribe before the engine starts so no event is missed.
        health.spawn_listener(bus.subscribe());
        spawn_telemetry_subscriber(telemetry.clone(), bus.subscribe());
        spawn_log_subscriber(bus.subscribe());

        let engine = JobEngine::new(broker.clone(), handler, bus.clone()).spawn(engine_config);
        let gateway =
            JobSubmissionGateway::new(broker.clone(), health.clone(), bus.clone()).with_options(options);

        let services = Arc::new(WorkerServices {
            gateway,
            broker,
            health,
            telemetry,
            started_at: StartedAt::now(),
        });

        Self {
            services,
            bus,
            engine,
        }
    }

    /// Worker wiring from settings, with a fresh `worker-service` telemetry.
    pub fn from_settings(
        settings: &Settings,
        broker: Arc<dyn QueueBroker>,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self, MetricsError> {
        let telemetry = Telemetry::new(crate::WORKER_SERVICE)?;
        Ok(Self::start(
            broker,
            handler,
            settings.job_options,
            settings.engine_config(crate::WORKER_SERVICE),
            telemetry,
        ))
    }

    /// Stop the engine: no new dequeues, in-flight jobs drain, broker closes.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        self.engine.shutdown().await
    }
}
