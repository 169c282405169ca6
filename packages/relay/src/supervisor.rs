use std::sync::Arc;
use std::time::Duration;

use common::provider::Providers;
use sea_orm::DatabaseConnection;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::idempotency;
use crate::monitor::DegradedModeMonitor;
use crate::processor::QueueProcessor;

/// Owns the pipeline's three background loops: the queue poll, the
/// degraded-mode health check, and the idempotency-key sweep.
///
/// Started once at process boot; `shutdown` cancels and awaits every loop.
pub struct Supervisor {
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn start(db: DatabaseConnection, providers: Providers, config: &AppConfig) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let processor = Arc::new(QueueProcessor::new(
            db.clone(),
            providers.clone(),
            config.pipeline.clone(),
            config.alerts.clone(),
        ));
        tasks.push(tokio::spawn(poll_loop(
            processor,
            Duration::from_secs(config.pipeline.poll_interval_secs),
            cancel.clone(),
        )));

        let monitor = DegradedModeMonitor::new(
            db.clone(),
            providers,
            config.monitor.clone(),
            config.alerts.clone(),
        );
        tasks.push(tokio::spawn(health_loop(
            monitor,
            Duration::from_secs(config.monitor.health_interval_secs),
            cancel.clone(),
        )));

        tasks.push(tokio::spawn(sweep_loop(
            db,
            Duration::from_secs(config.idempotency.sweep_interval_secs),
            cancel.clone(),
        )));

        Self { tasks, cancel }
    }

    /// Cancel every loop and wait for it to wind down.
    pub async fn shutdown(self) {
        info!("Stopping notification pipeline");
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task failed during shutdown");
            }
        }
        info!("Notification pipeline stopped");
    }
}

async fn poll_loop(processor: Arc<QueueProcessor>, period: Duration, cancel: CancellationToken) {
    info!(period_secs = period.as_secs(), "Starting queue poll loop");
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = processor.run_once().await {
                    error!(error = %e, "Queue poll cycle failed");
                }
            }
        }
    }

    info!("Queue poll loop stopped");
}

async fn health_loop(
    mut monitor: DegradedModeMonitor,
    period: Duration,
    cancel: CancellationToken,
) {
    info!(period_secs = period.as_secs(), "Starting degraded-mode health check");
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = monitor.run_health_check().await {
                    error!(error = %e, "Health check failed");
                }
            }
        }
    }

    info!("Health check loop stopped");
}

async fn sweep_loop(db: DatabaseConnection, period: Duration, cancel: CancellationToken) {
    info!(period_secs = period.as_secs(), "Starting idempotency-key sweep");
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = idempotency::sweep_expired(&db).await {
                    error!(error = %e, "Idempotency-key sweep failed");
                }
            }
        }
    }

    info!("Idempotency-key sweep stopped");
}
