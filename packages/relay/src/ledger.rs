use chrono::Utc;
use common::provider::ProviderRole;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DbErr, EntityTrait, QueryOrder, Set};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::entity::audit_record;

/// One delivery attempt, before chaining.
pub struct DeliveryAttempt<'a> {
    pub event_type: &'a str,
    /// The notification recipient being acted upon.
    pub actor_email: &'a str,
    pub recipients: &'a [String],
    pub delivery: &'a str,
    pub provider: ProviderRole,
    pub success: bool,
    pub error: Option<&'a str>,
}

/// Result of a full-chain verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainVerification {
    pub valid: bool,
    /// Id of the first record failing a link or data integrity check.
    pub broken_at: Option<i32>,
}

impl ChainVerification {
    fn valid() -> Self {
        Self {
            valid: true,
            broken_at: None,
        }
    }

    fn broken_at(id: i32) -> Self {
        Self {
            valid: false,
            broken_at: Some(id),
        }
    }
}

/// The canonical serialization covered by a record's hash. Field order is
/// fixed by this struct; `recipients` is the already-serialized list.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalRecord<'a> {
    event_type: &'a str,
    actor_email: &'a str,
    recipients: &'a str,
    delivery: &'a str,
    provider: &'a str,
    success: bool,
    error: Option<&'a str>,
    prev_hash: Option<&'a str>,
}

fn canonical_hash(record: &CanonicalRecord<'_>) -> String {
    let bytes = serde_json::to_vec(record).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Append-only, hash-chained log of delivery attempts.
pub struct AuditLedger<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> AuditLedger<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Append one tamper-evident record for a delivery attempt.
    ///
    /// Reads the most recent record's hash and links to it. Appends are
    /// serialized by the processor's sequential loop; callers treat
    /// failures as logged-and-ignored so the delivery outcome is never
    /// blocked on audit availability.
    pub async fn append(
        &self,
        attempt: &DeliveryAttempt<'_>,
    ) -> Result<audit_record::Model, DbErr> {
        let prev_hash = audit_record::Entity::find()
            .order_by_desc(audit_record::Column::Id)
            .one(self.conn)
            .await?
            .map(|r| r.hash);

        let recipients = serde_json::to_string(attempt.recipients).unwrap_or_default();
        let hash = canonical_hash(&CanonicalRecord {
            event_type: attempt.event_type,
            actor_email: attempt.actor_email,
            recipients: &recipients,
            delivery: attempt.delivery,
            provider: attempt.provider.as_str(),
            success: attempt.success,
            error: attempt.error,
            prev_hash: prev_hash.as_deref(),
        });

        let model = audit_record::ActiveModel {
            event_type: Set(attempt.event_type.to_string()),
            actor_email: Set(attempt.actor_email.to_string()),
            recipients: Set(recipients),
            delivery: Set(attempt.delivery.to_string()),
            provider: Set(attempt.provider.as_str().to_string()),
            success: Set(attempt.success),
            error: Set(attempt.error.map(str::to_owned)),
            prev_hash: Set(prev_hash),
            hash: Set(hash),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        model.insert(self.conn).await
    }

    /// Walk the whole chain in insertion order and report the first
    /// violation: a broken link (`prev_hash` mismatch) or tampered data
    /// (recomputed hash differs from the stored one).
    ///
    /// Read-only diagnostic; repairs nothing.
    pub async fn verify_chain(&self) -> Result<ChainVerification, DbErr> {
        let records = audit_record::Entity::find()
            .order_by_asc(audit_record::Column::Id)
            .all(self.conn)
            .await?;

        let mut prev_hash: Option<&str> = None;
        for record in &records {
            if record.prev_hash.as_deref() != prev_hash {
                return Ok(ChainVerification::broken_at(record.id));
            }

            let recomputed = canonical_hash(&CanonicalRecord {
                event_type: &record.event_type,
                actor_email: &record.actor_email,
                recipients: &record.recipients,
                delivery: &record.delivery,
                provider: &record.provider,
                success: record.success,
                error: record.error.as_deref(),
                prev_hash: record.prev_hash.as_deref(),
            });
            if recomputed != record.hash {
                return Ok(ChainVerification::broken_at(record.id));
            }

            prev_hash = Some(&record.hash);
        }

        Ok(ChainVerification::valid())
    }
}
