use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{Event, OrderStatus, SeatStatus, Zone};
use crate::utils::error::AppError;
use crate::AppState;

/// Order statuses whose items count against zone capacity. Voided (REFUNDED)
/// orders stay committed: a void releases nothing automatically, matching the
/// seat path where a voided sale keeps its seats SOLD. Only CANCELLED orders
/// hand their quantity back.
const COMMITTED_ORDER_STATUSES: [OrderStatus; 4] = [
    OrderStatus::Pending,
    OrderStatus::Reserved,
    OrderStatus::Completed,
    OrderStatus::Refunded,
];

/// Committed and locked quantities currently counted against a zone's
/// capacity. `committed` covers order items of non-cancelled orders (pending
/// holds, payment-plan reservations, completed and voided sales alike — a
/// reservation always parallels a live order, so it is never summed a second
/// time); `locked` covers ACTIVE, unexpired cart locks.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct ZoneUsage {
    pub committed: i64,
    pub locked: i64,
}

/// Remaining general-admission capacity after both deductions. Never negative.
pub fn effective_available(capacity: i64, usage: ZoneUsage) -> i64 {
    (capacity - usage.committed - usage.locked).max(0)
}

/// Authoritative usage read. Callers deciding a mutation run this against a
/// transaction holding the zone row lock; the cache is never consulted for
/// that decision. `exclude_session` leaves out that session's own active
/// locks so a re-selection extends rather than competes with itself.
pub async fn zone_usage<'e, E>(
    executor: E,
    zone_id: Uuid,
    exclude_session: Option<&str>,
) -> Result<ZoneUsage, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as(
        "SELECT \
           COALESCE((SELECT SUM(oi.quantity) FROM order_items oi \
                     JOIN orders o ON o.id = oi.order_id \
                     WHERE oi.zone_id = $1 \
                       AND o.status = ANY($3)), 0)::BIGINT AS committed, \
           COALESCE((SELECT SUM(l.quantity) FROM cart_item_locks l \
                     WHERE l.zone_id = $1 \
                       AND l.status = 'ACTIVE' \
                       AND l.expires_at > NOW() \
                       AND ($2::TEXT IS NULL OR l.session_key <> $2)), 0)::BIGINT AS locked",
    )
    .bind(zone_id)
    .bind(exclude_session)
    .bind(&COMMITTED_ORDER_STATUSES[..])
    .fetch_one(executor)
    .await
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatSnapshot {
    pub seat_id: Uuid,
    pub zone_id: Uuid,
    pub event_id: Uuid,
    pub label: String,
    pub status: SeatStatus,
    /// Whether an unexpired browsing lock is held on this seat.
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub zone_id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub seated: bool,
    pub capacity: i64,
    pub committed: i64,
    pub locked: i64,
    pub available: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub event_id: Uuid,
    pub title: String,
    pub total_capacity: i64,
    pub total_available: i64,
    pub zones: Vec<ZoneSnapshot>,
}

#[derive(FromRow)]
struct SeatRow {
    seat_id: Uuid,
    zone_id: Uuid,
    event_id: Uuid,
    label: String,
    status: SeatStatus,
    locked: bool,
}

pub async fn get_seat(state: &AppState, seat_id: Uuid) -> Result<SeatSnapshot, AppError> {
    if let Some(cached) = state.cache.get_seat(seat_id).await {
        if let Ok(snapshot) = serde_json::from_value(cached) {
            return Ok(snapshot);
        }
    }

    let row: SeatRow = sqlx::query_as(
        "SELECT s.id AS seat_id, s.zone_id, z.event_id, s.label, s.status, \
                EXISTS (SELECT 1 FROM cart_item_locks l \
                        WHERE l.seat_id = s.id \
                          AND l.status = 'ACTIVE' \
                          AND l.expires_at > NOW()) AS locked \
         FROM seats s \
         JOIN zones z ON z.id = s.zone_id \
         WHERE s.id = $1",
    )
    .bind(seat_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Seat {seat_id} was not found")))?;

    let snapshot = SeatSnapshot {
        seat_id: row.seat_id,
        zone_id: row.zone_id,
        event_id: row.event_id,
        label: row.label,
        status: row.status,
        locked: row.locked,
    };

    state
        .cache
        .put_seat(seat_id, serde_json::to_value(&snapshot).unwrap_or(Value::Null))
        .await;

    Ok(snapshot)
}

pub async fn get_zone(state: &AppState, zone_id: Uuid) -> Result<ZoneSnapshot, AppError> {
    if let Some(cached) = state.cache.get_zone(zone_id).await {
        if let Ok(snapshot) = serde_json::from_value(cached) {
            return Ok(snapshot);
        }
    }

    let snapshot = build_zone_snapshot(state, zone_id).await?;

    state
        .cache
        .put_zone(zone_id, serde_json::to_value(&snapshot).unwrap_or(Value::Null))
        .await;

    Ok(snapshot)
}

pub async fn get_event(state: &AppState, event_id: Uuid) -> Result<EventSnapshot, AppError> {
    if let Some(cached) = state.cache.get_event(event_id).await {
        if let Ok(snapshot) = serde_json::from_value(cached) {
            return Ok(snapshot);
        }
    }

    let event: Event = sqlx::query_as("SELECT * FROM events WHERE id = $1")
        .bind(event_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {event_id} was not found")))?;

    let zone_rows: Vec<Zone> =
        sqlx::query_as("SELECT * FROM zones WHERE event_id = $1 ORDER BY name")
            .bind(event_id)
            .fetch_all(&state.db)
            .await?;

    let mut zones = Vec::with_capacity(zone_rows.len());
    for row in zone_rows {
        let usage = zone_usage(&state.db, row.id, None).await?;
        zones.push(snapshot_from_parts(&row, usage));
    }

    let snapshot = EventSnapshot {
        event_id,
        title: event.title,
        total_capacity: zones.iter().map(|z| z.capacity).sum(),
        total_available: zones.iter().map(|z| z.available).sum(),
        zones,
    };

    state
        .cache
        .put_event(event_id, serde_json::to_value(&snapshot).unwrap_or(Value::Null))
        .await;

    Ok(snapshot)
}

async fn build_zone_snapshot(state: &AppState, zone_id: Uuid) -> Result<ZoneSnapshot, AppError> {
    let row: Zone = sqlx::query_as("SELECT * FROM zones WHERE id = $1")
        .bind(zone_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Zone {zone_id} was not found")))?;

    let usage = zone_usage(&state.db, zone_id, None).await?;
    Ok(snapshot_from_parts(&row, usage))
}

fn snapshot_from_parts(zone: &Zone, usage: ZoneUsage) -> ZoneSnapshot {
    let capacity = i64::from(zone.capacity);
    ZoneSnapshot {
        zone_id: zone.id,
        event_id: zone.event_id,
        name: zone.name.clone(),
        seated: zone.seated,
        capacity,
        committed: usage.committed,
        locked: usage.locked,
        available: effective_available(capacity, usage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_subtracts_both_pools_independently() {
        let usage = ZoneUsage {
            committed: 3,
            locked: 4,
        };
        assert_eq!(effective_available(10, usage), 3);
    }

    #[test]
    fn available_never_goes_negative() {
        let usage = ZoneUsage {
            committed: 8,
            locked: 6,
        };
        assert_eq!(effective_available(10, usage), 0);
    }

    #[test]
    fn empty_zone_has_full_capacity() {
        let usage = ZoneUsage {
            committed: 0,
            locked: 0,
        };
        assert_eq!(effective_available(250, usage), 250);
    }

    #[test]
    fn voided_orders_stay_committed_cancelled_orders_do_not() {
        // A void keeps the quantity against the zone, mirroring the seat
        // path where a voided sale keeps its seats SOLD; only cancellation
        // hands capacity back.
        assert!(COMMITTED_ORDER_STATUSES.contains(&OrderStatus::Refunded));
        assert!(!COMMITTED_ORDER_STATUSES.contains(&OrderStatus::Cancelled));
    }

    #[test]
    fn converted_lock_hands_over_to_committed_without_double_count() {
        // Checkout flips a 6-seat lock to CONVERTED in the same transaction
        // that creates the order, so the quantity moves pools atomically.
        let before = ZoneUsage {
            committed: 0,
            locked: 6,
        };
        let after = ZoneUsage {
            committed: 6,
            locked: 0,
        };
        assert_eq!(effective_available(10, before), effective_available(10, after));
    }
}
