use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A durable outbound notification awaiting delivery.
///
/// Deleted on first successful delivery; retained permanently once the
/// attempt count reaches `max_attempts` (terminal failure marker).
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_job")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub recipient: String,

    pub subject: String,

    #[sea_orm(column_type = "Text")]
    pub body: String,

    /// Owning user, when the notification belongs to an account.
    pub user_id: Option<i32>,

    /// Delivery channel tag ("email", ...).
    #[sea_orm(indexed)]
    pub delivery: String,

    #[sea_orm(default_value = 0)]
    pub attempts: i32,

    pub max_attempts: i32,

    /// Next time this job is eligible for a poll cycle.
    #[sea_orm(indexed)]
    pub next_run_at: DateTimeUtc,

    #[sea_orm(column_type = "Text")]
    pub last_error: Option<String>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
