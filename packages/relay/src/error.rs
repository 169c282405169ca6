use sea_orm::DbErr;
use thiserror::Error;

/// Errors surfaced to enqueue callers.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("recipient must not be empty")]
    EmptyRecipient,

    #[error(transparent)]
    Db(#[from] DbErr),
}

/// Errors surfaced by the idempotency guard.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// The key is claimed by a different user. The message deliberately
    /// does not reveal whether the key exists.
    #[error("invalid request")]
    KeyConflict,

    #[error(transparent)]
    Db(#[from] DbErr),

    /// The wrapped action itself failed; the transaction was rolled back.
    #[error("action failed: {0}")]
    Handler(anyhow::Error),
}
