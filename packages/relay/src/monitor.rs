use chrono::Utc;
use common::alert::DegradedModeAlert;
use common::provider::Providers;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter};
use tracing::{error, info, warn};

use crate::config::{AlertsConfig, MonitorConfig};
use crate::entity::notification_job;

/// Snapshot of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub failing_jobs: u64,
    pub degraded: bool,
    /// Whether this check raised an operator alert (healthy-to-degraded
    /// edge).
    pub alerted: bool,
}

/// Periodic queue health check. Observability only: never mutates jobs or
/// their scheduling.
pub struct DegradedModeMonitor {
    db: DatabaseConnection,
    providers: Providers,
    config: MonitorConfig,
    alerts: AlertsConfig,
    /// Set while the queue is over the alert threshold. Alerts fire on the
    /// healthy-to-degraded transition only, and re-arm on recovery.
    degraded: bool,
}

impl DegradedModeMonitor {
    pub fn new(
        db: DatabaseConnection,
        providers: Providers,
        config: MonitorConfig,
        alerts: AlertsConfig,
    ) -> Self {
        Self {
            db,
            providers,
            config,
            alerts,
            degraded: false,
        }
    }

    /// Count jobs failing repeatedly and alert on the transition into
    /// degraded mode.
    pub async fn run_health_check(&mut self) -> Result<HealthReport, DbErr> {
        let failing_jobs = notification_job::Entity::find()
            .filter(notification_job::Column::Attempts.gte(self.config.failing_attempts))
            .count(&self.db)
            .await?;

        let over_threshold = failing_jobs > self.config.failing_jobs_threshold;
        let mut alerted = false;

        if over_threshold && !self.degraded {
            warn!(
                failing_jobs,
                threshold = self.config.failing_jobs_threshold,
                "Notification queue entered degraded mode"
            );
            self.send_alert(failing_jobs).await;
            alerted = true;
        } else if !over_threshold && self.degraded {
            info!(failing_jobs, "Notification queue recovered from degraded mode");
        }

        self.degraded = over_threshold;

        Ok(HealthReport {
            failing_jobs,
            degraded: over_threshold,
            alerted,
        })
    }

    async fn send_alert(&self, failing_jobs: u64) {
        let alert = DegradedModeAlert {
            failing_jobs,
            threshold: self.config.failing_jobs_threshold,
            observed_at: Utc::now(),
        };
        let message = alert.into_message(&self.alerts.operator_email);

        let outcome = self
            .providers
            .send_with_failover(&message, &self.alerts.retry)
            .await;
        if let Err(e) = outcome.result {
            error!(error = %e, "Failed to deliver degraded-mode alert");
        }
    }
}
