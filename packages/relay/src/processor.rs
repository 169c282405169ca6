use chrono::{Duration, Utc};
use common::alert::SlaBreachAlert;
use common::provider::{FailoverOutcome, OutboundMessage, Providers};
use common::retry::reschedule_delay_secs;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    ExprTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use tracing::{error, info, warn};

use crate::config::{AlertsConfig, PipelineConfig};
use crate::entity::notification_job;
use crate::error::EnqueueError;
use crate::ledger::{AuditLedger, DeliveryAttempt};

/// Event type stamped on audit records written by the queue processor.
pub const EVENT_NOTIFICATION_DELIVERY: &str = "notification_delivery";

/// Retry budget assigned to newly enqueued jobs.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// A notification to enqueue for guaranteed delivery.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub user_id: Option<i32>,
    pub delivery: String,
}

/// Insert a job eligible for the next poll cycle.
///
/// The only public mutation surface: delivery happens asynchronously, and
/// jobs are otherwise touched only by the processor.
pub async fn enqueue<C: ConnectionTrait>(
    conn: &C,
    notification: NewNotification,
) -> Result<notification_job::Model, EnqueueError> {
    if notification.to.trim().is_empty() {
        return Err(EnqueueError::EmptyRecipient);
    }

    let now = Utc::now();
    let model = notification_job::ActiveModel {
        recipient: Set(notification.to),
        subject: Set(notification.subject),
        body: Set(notification.html),
        user_id: Set(notification.user_id),
        delivery: Set(notification.delivery),
        attempts: Set(0),
        max_attempts: Set(DEFAULT_MAX_ATTEMPTS),
        next_run_at: Set(now),
        last_error: Set(None),
        created_at: Set(now),
        ..Default::default()
    };

    Ok(model.insert(conn).await?)
}

/// Where one poll-cycle attempt left a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Delivered and deleted.
    Delivered,
    /// Failed; eligible again after backoff.
    Rescheduled,
    /// Retry budget exhausted; row retained, breach alert sent.
    Terminal,
}

/// Tally for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub delivered: u32,
    pub rescheduled: u32,
    pub terminal: u32,
}

/// Drains due notification jobs: primary delivery with failover, one audit
/// record per attempt, delete on success, backoff-reschedule or
/// terminal-escalate on failure.
pub struct QueueProcessor {
    db: DatabaseConnection,
    providers: Providers,
    pipeline: PipelineConfig,
    alerts: AlertsConfig,
}

impl QueueProcessor {
    pub fn new(
        db: DatabaseConnection,
        providers: Providers,
        pipeline: PipelineConfig,
        alerts: AlertsConfig,
    ) -> Self {
        Self {
            db,
            providers,
            pipeline,
            alerts,
        }
    }

    /// One poll cycle.
    ///
    /// Jobs are drained oldest-first and processed sequentially: delivery
    /// ordering stays predictable and the audit ledger keeps a single
    /// writer.
    pub async fn run_once(&self) -> Result<PollOutcome, DbErr> {
        let due = notification_job::Entity::find()
            .filter(notification_job::Column::NextRunAt.lte(Utc::now()))
            .filter(
                Expr::col(notification_job::Column::Attempts)
                    .lt(Expr::col(notification_job::Column::MaxAttempts)),
            )
            .order_by_asc(notification_job::Column::CreatedAt)
            .limit(self.pipeline.batch_size)
            .all(&self.db)
            .await?;

        let mut outcome = PollOutcome::default();
        for job in due {
            let job_id = job.id;
            // One job's failure never aborts the rest of the batch.
            match self.process_job(job).await {
                Ok(JobOutcome::Delivered) => outcome.delivered += 1,
                Ok(JobOutcome::Rescheduled) => outcome.rescheduled += 1,
                Ok(JobOutcome::Terminal) => outcome.terminal += 1,
                Err(e) => error!(job_id, error = %e, "Failed to process notification job"),
            }
        }

        Ok(outcome)
    }

    async fn process_job(&self, job: notification_job::Model) -> Result<JobOutcome, DbErr> {
        let message = OutboundMessage {
            to: job.recipient.clone(),
            subject: job.subject.clone(),
            html: job.body.clone(),
            text: None,
        };

        let attempt = self
            .providers
            .send_with_failover(&message, &self.pipeline.provider_retry)
            .await;

        self.record_attempt(&job, &attempt).await;

        match attempt.result {
            Ok(_) => {
                notification_job::Entity::delete_by_id(job.id)
                    .exec(&self.db)
                    .await?;
                info!(
                    job_id = job.id,
                    recipient = %job.recipient,
                    provider = %attempt.provider,
                    attempts = job.attempts + 1,
                    "Notification delivered"
                );
                Ok(JobOutcome::Delivered)
            }
            Err(err) => self.handle_failure(job, err.to_string()).await,
        }
    }

    /// Exactly one audit entry per delivery attempt. Append failures are
    /// logged and ignored: the delivery outcome takes precedence over
    /// audit availability.
    async fn record_attempt(&self, job: &notification_job::Model, attempt: &FailoverOutcome) {
        let recipients = [job.recipient.clone()];
        let error_text = attempt.result.as_ref().err().map(|e| e.to_string());
        let entry = DeliveryAttempt {
            event_type: EVENT_NOTIFICATION_DELIVERY,
            actor_email: &job.recipient,
            recipients: &recipients,
            delivery: &job.delivery,
            provider: attempt.provider,
            success: attempt.succeeded(),
            error: error_text.as_deref(),
        };

        if let Err(e) = AuditLedger::new(&self.db).append(&entry).await {
            error!(job_id = job.id, error = %e, "Failed to append audit record");
        }
    }

    async fn handle_failure(
        &self,
        job: notification_job::Model,
        error_text: String,
    ) -> Result<JobOutcome, DbErr> {
        let attempts = job.attempts + 1;

        if attempts >= job.max_attempts {
            let update = notification_job::ActiveModel {
                id: Set(job.id),
                attempts: Set(attempts),
                last_error: Set(Some(error_text.clone())),
                ..Default::default()
            };
            update.update(&self.db).await?;

            error!(
                job_id = job.id,
                recipient = %job.recipient,
                attempts,
                error = %error_text,
                "Notification terminally failed; row retained for inspection"
            );
            self.send_breach_alert(&job, attempts, &error_text).await;
            return Ok(JobOutcome::Terminal);
        }

        let delay_secs = reschedule_delay_secs(attempts);
        let update = notification_job::ActiveModel {
            id: Set(job.id),
            attempts: Set(attempts),
            next_run_at: Set(Utc::now() + Duration::seconds(delay_secs)),
            last_error: Set(Some(error_text.clone())),
            ..Default::default()
        };
        update.update(&self.db).await?;

        warn!(
            job_id = job.id,
            attempts,
            delay_secs,
            error = %error_text,
            "Delivery failed, rescheduled"
        );
        Ok(JobOutcome::Rescheduled)
    }

    /// One-time SLA-breach escalation, through the same provider
    /// capability as ordinary notifications. Best effort: a failed send is
    /// logged and the job stays terminal either way.
    async fn send_breach_alert(
        &self,
        job: &notification_job::Model,
        attempts: i32,
        error_text: &str,
    ) {
        let alert = SlaBreachAlert {
            job_id: job.id,
            recipient: job.recipient.clone(),
            subject: job.subject.clone(),
            attempts,
            last_error: Some(error_text.to_string()),
            created_at: job.created_at,
        };
        let message = alert.into_message(&self.alerts.operator_email);

        let outcome = self
            .providers
            .send_with_failover(&message, &self.alerts.retry)
            .await;
        if let Err(e) = outcome.result {
            error!(job_id = job.id, error = %e, "Failed to deliver SLA breach alert");
        }
    }
}

/// Queue counts for operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs still eligible for delivery (including those in backoff).
    pub pending: u64,
    /// Pending jobs at or past the failing-attempts threshold.
    pub struggling: u64,
    /// Jobs retained at terminal failure.
    pub terminal: u64,
}

pub async fn queue_stats<C: ConnectionTrait>(
    conn: &C,
    failing_attempts: i32,
) -> Result<QueueStats, DbErr> {
    let pending = notification_job::Entity::find()
        .filter(
            Expr::col(notification_job::Column::Attempts)
                .lt(Expr::col(notification_job::Column::MaxAttempts)),
        )
        .count(conn)
        .await?;

    let struggling = notification_job::Entity::find()
        .filter(notification_job::Column::Attempts.gte(failing_attempts))
        .filter(
            Expr::col(notification_job::Column::Attempts)
                .lt(Expr::col(notification_job::Column::MaxAttempts)),
        )
        .count(conn)
        .await?;

    let terminal = notification_job::Entity::find()
        .filter(
            Expr::col(notification_job::Column::Attempts)
                .gte(Expr::col(notification_job::Column::MaxAttempts)),
        )
        .count(conn)
        .await?;

    Ok(QueueStats {
        pending,
        struggling,
        terminal,
    })
}

/// Terminally failed jobs, newest first, for manual inspection.
pub async fn terminal_jobs<C: ConnectionTrait>(
    conn: &C,
) -> Result<Vec<notification_job::Model>, DbErr> {
    notification_job::Entity::find()
        .filter(
            Expr::col(notification_job::Column::Attempts)
                .gte(Expr::col(notification_job::Column::MaxAttempts)),
        )
        .order_by_desc(notification_job::Column::CreatedAt)
        .all(conn)
        .await
}

/// Result of a manual replay request for a terminal job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayResult {
    /// Attempts reset; the job is immediately eligible again.
    Reset,
    NotFound,
    /// The job has retries left; the processor still owns it.
    NotTerminal,
}

/// Manually put a terminally failed job back in rotation.
pub async fn retry_terminal<C: ConnectionTrait>(
    conn: &C,
    id: i32,
) -> Result<ReplayResult, DbErr> {
    let Some(job) = notification_job::Entity::find_by_id(id).one(conn).await? else {
        return Ok(ReplayResult::NotFound);
    };

    if job.attempts < job.max_attempts {
        return Ok(ReplayResult::NotTerminal);
    }

    let update = notification_job::ActiveModel {
        id: Set(job.id),
        attempts: Set(0),
        next_run_at: Set(Utc::now()),
        last_error: Set(None),
        ..Default::default()
    };
    update.update(conn).await?;

    info!(job_id = id, "Terminal job manually reset for replay");
    Ok(ReplayResult::Reset)
}
