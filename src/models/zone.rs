use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A capacity pool within an event: either a seated block (individual seat
/// rows) or a general-admission area tracked purely by quantity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Zone {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub capacity: i32,
    pub unit_price: Decimal,
    pub seated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
