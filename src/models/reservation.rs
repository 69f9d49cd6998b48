use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Active,
    Expired,
    Completed,
    Cancelled,
}

/// Longer-lived hold backing a pending order, typically an installment plan.
/// Seat-backed holds keep the seat RESERVED; general-admission holds only
/// record a quantity against the zone.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReservedTicket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub zone_id: Uuid,
    pub seat_id: Option<Uuid>,
    pub quantity: i32,
    pub reserved_until: DateTime<Utc>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
