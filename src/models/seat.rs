use serde::{Deserialize, Serialize};

/// Seat status is mutated exclusively by the reservation/sale pipeline:
/// AVAILABLE -> RESERVED at order creation, RESERVED -> SOLD at completion,
/// RESERVED -> AVAILABLE when a hold expires or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "seat_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Reserved,
    Sold,
}
