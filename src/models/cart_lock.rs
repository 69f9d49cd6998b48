use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "lock_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockStatus {
    Active,
    Released,
    Expired,
    Converted,
}

/// Short-TTL advisory hold taken while a session is browsing. At most one
/// ACTIVE lock per seat across all sessions (enforced by a partial unique
/// index); seat locks always carry quantity 1.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CartItemLock {
    pub id: Uuid,
    pub session_key: String,
    pub zone_id: Uuid,
    pub seat_id: Option<Uuid>,
    pub quantity: i32,
    pub expires_at: DateTime<Utc>,
    pub status: LockStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
