use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One hash-chained audit entry per delivery attempt.
///
/// Append-only: `hash` covers every other field including `prev_hash`, and
/// `prev_hash` links to the previous record's `hash`, so any retroactive
/// edit or deletion breaks chain verification from that point forward.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audit_record")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub event_type: String,

    /// The notification recipient being acted upon.
    pub actor_email: String,

    /// Ordered recipient list, JSON-serialized.
    #[sea_orm(column_type = "Text")]
    pub recipients: String,

    pub delivery: String,

    /// "primary" or "secondary".
    pub provider: String,

    pub success: bool,

    #[sea_orm(column_type = "Text")]
    pub error: Option<String>,

    /// Hash of the previous record. Null only for the very first record.
    pub prev_hash: Option<String>,

    /// Hex SHA-256 over the canonical serialization of this record.
    pub hash: String,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
