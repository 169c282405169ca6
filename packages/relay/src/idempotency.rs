//! Transactional, key-based dedupe for side-effecting actions.
//!
//! A caller-supplied idempotency key maps to exactly one result entity even
//! when the transport retries the request. The whole
//! check + claim + handler + completion sequence runs in one transaction.
//!
//! A claim without a result id (a prior attempt crashed mid-flight) is
//! re-run from scratch. Handlers must tolerate that: this guard alone is
//! at-least-once, not exactly-once.

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbErr, EntityTrait, QueryFilter, Set, SqlErr, TransactionTrait,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::entity::idempotency_key;
use crate::error::IdempotencyError;

/// Keys live this long before the periodic sweep removes them.
const KEY_TTL_HOURS: i64 = 24;

/// Caller identity plus the dedupe key for one idempotent action attempt.
#[derive(Debug, Clone)]
pub struct IdempotentRequest {
    /// Caller-supplied key; generated when absent.
    pub key: Option<String>,
    pub user_id: i32,
}

/// Returned by the wrapped handler on success.
#[derive(Debug, Clone, Copy)]
pub struct CompletedAction {
    pub entity_id: i32,
}

/// The result id, and whether it came from a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotentOutcome {
    pub replay: bool,
    pub entity_id: i32,
}

enum GuardFlow {
    /// The key already carries a result; short-circuit.
    Replay(i32),
    /// The key is ours (fresh claim or stale mid-flight claim); run the
    /// handler.
    Claimed(idempotency_key::Model),
}

/// Run `handler` at most once per idempotency key.
///
/// Cross-user key reuse fails with a client error that does not reveal
/// whether the key exists. Completed keys replay the stored result without
/// invoking the handler. The handler receives the open transaction and
/// must return the id of the entity it created.
pub async fn with_idempotency<F>(
    db: &DatabaseConnection,
    action: &str,
    request: IdempotentRequest,
    handler: F,
) -> Result<IdempotentOutcome, IdempotencyError>
where
    F: AsyncFnOnce(&DatabaseTransaction) -> anyhow::Result<CompletedAction>,
{
    let key = request.key.unwrap_or_else(|| Uuid::new_v4().to_string());

    let txn = db.begin().await?;

    let record = match claim_or_replay(&txn, action, &key, request.user_id).await {
        Ok(GuardFlow::Replay(entity_id)) => {
            txn.rollback().await?;
            debug!(action, key = %key, entity_id, "Replaying completed idempotent action");
            return Ok(IdempotentOutcome {
                replay: true,
                entity_id,
            });
        }
        Ok(GuardFlow::Claimed(record)) => record,
        Err(e) => {
            let _ = txn.rollback().await;
            return Err(e);
        }
    };

    let completed = match handler(&txn).await {
        Ok(completed) => completed,
        Err(e) => {
            let _ = txn.rollback().await;
            return Err(IdempotencyError::Handler(e));
        }
    };

    let mut active: idempotency_key::ActiveModel = record.into();
    active.entity_id = Set(Some(completed.entity_id));
    if let Err(e) = active.update(&txn).await {
        let _ = txn.rollback().await;
        return Err(e.into());
    }

    txn.commit().await?;

    Ok(IdempotentOutcome {
        replay: false,
        entity_id: completed.entity_id,
    })
}

/// Look up or claim the key inside the caller's transaction.
///
/// Insert uses on-conflict-tolerant semantics: a concurrent duplicate
/// claim surfaces as a unique violation, which re-routes through the
/// existing row instead of erroring.
async fn claim_or_replay(
    txn: &DatabaseTransaction,
    action: &str,
    key: &str,
    user_id: i32,
) -> Result<GuardFlow, IdempotencyError> {
    if let Some(record) = find_by_key(txn, key).await? {
        return evaluate_claim(record, user_id);
    }

    let now = Utc::now();
    let model = idempotency_key::ActiveModel {
        key: Set(key.to_string()),
        user_id: Set(user_id),
        action: Set(action.to_string()),
        entity_id: Set(None),
        expires_at: Set(now + Duration::hours(KEY_TTL_HOURS)),
        created_at: Set(now),
        ..Default::default()
    };

    match model.insert(txn).await {
        Ok(inserted) => Ok(GuardFlow::Claimed(inserted)),
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            let record = find_by_key(txn, key).await?.ok_or_else(|| {
                DbErr::Custom("UniqueConstraintViolation but existing row not found".to_string())
            })?;
            evaluate_claim(record, user_id)
        }
        Err(e) => Err(e.into()),
    }
}

fn evaluate_claim(
    record: idempotency_key::Model,
    user_id: i32,
) -> Result<GuardFlow, IdempotencyError> {
    if record.user_id != user_id {
        return Err(IdempotencyError::KeyConflict);
    }

    match record.entity_id {
        Some(entity_id) => Ok(GuardFlow::Replay(entity_id)),
        // Prior attempt crashed before recording its result; re-run.
        None => Ok(GuardFlow::Claimed(record)),
    }
}

async fn find_by_key(
    txn: &DatabaseTransaction,
    key: &str,
) -> Result<Option<idempotency_key::Model>, DbErr> {
    idempotency_key::Entity::find()
        .filter(idempotency_key::Column::Key.eq(key))
        .one(txn)
        .await
}

/// Delete idempotency records past their expiry, regardless of completion
/// state. Returns the number of rows removed.
pub async fn sweep_expired<C: ConnectionTrait>(conn: &C) -> Result<u64, DbErr> {
    let result = idempotency_key::Entity::delete_many()
        .filter(idempotency_key::Column::ExpiresAt.lt(Utc::now()))
        .exec(conn)
        .await?;

    if result.rows_affected > 0 {
        info!(removed = result.rows_affected, "Swept expired idempotency keys");
    }

    Ok(result.rows_affected)
}
