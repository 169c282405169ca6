pub mod audit_record;
pub mod idempotency_key;
pub mod notification_job;
