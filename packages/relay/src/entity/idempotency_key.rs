use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A claimed idempotency key, mapping one caller-supplied key to at most
/// one side-effecting result.
///
/// `entity_id` is null while the wrapped action is in flight; once set, all
/// future calls with the same key replay instead of re-executing.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "idempotency_key")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub key: String,

    pub user_id: i32,

    /// Name of the wrapped action ("create_contract", ...).
    pub action: String,

    pub entity_id: Option<i32>,

    /// Swept once past this point, regardless of completion state.
    #[sea_orm(indexed)]
    pub expires_at: DateTimeUtc,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
