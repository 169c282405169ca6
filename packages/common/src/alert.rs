use chrono::{DateTime, Utc};

use crate::provider::OutboundMessage;

/// Operator escalation raised when a notification job exhausts its retry
/// budget.
#[derive(Debug, Clone)]
pub struct SlaBreachAlert {
    pub job_id: i32,
    pub recipient: String,
    pub subject: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SlaBreachAlert {
    pub fn into_message(self, operator: &str) -> OutboundMessage {
        let last_error = self.last_error.as_deref().unwrap_or("unknown");
        let html = format!(
            "<p>A notification exhausted its delivery retries and will not be \
             retried automatically. The job row is retained for inspection.</p>\
             <ul>\
             <li>Job id: {}</li>\
             <li>Recipient: {}</li>\
             <li>Subject: {}</li>\
             <li>Attempts: {}</li>\
             <li>Last error: {}</li>\
             <li>Enqueued at: {}</li>\
             </ul>",
            self.job_id,
            self.recipient,
            self.subject,
            self.attempts,
            last_error,
            self.created_at.to_rfc3339(),
        );

        OutboundMessage {
            to: operator.to_string(),
            subject: format!(
                "SLA breach: notification {} to {} undeliverable",
                self.job_id, self.recipient
            ),
            html,
            text: None,
        }
    }
}

/// Operator alert raised when too many jobs are failing repeatedly.
#[derive(Debug, Clone)]
pub struct DegradedModeAlert {
    pub failing_jobs: u64,
    pub threshold: u64,
    pub observed_at: DateTime<Utc>,
}

impl DegradedModeAlert {
    pub fn into_message(self, operator: &str) -> OutboundMessage {
        let html = format!(
            "<p>The notification pipeline is degraded: {} jobs are failing \
             repeatedly (alert threshold {}). Check provider status and the \
             audit ledger.</p>\
             <p>Observed at {}</p>",
            self.failing_jobs,
            self.threshold,
            self.observed_at.to_rfc3339(),
        );

        OutboundMessage {
            to: operator.to_string(),
            subject: format!(
                "Notification pipeline degraded: {} jobs failing",
                self.failing_jobs
            ),
            html,
            text: None,
        }
    }
}
