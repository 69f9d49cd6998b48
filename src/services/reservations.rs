use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::models::{ReservationStatus, ReservedTicket};
use crate::utils::error::AppError;
use crate::AppState;

/// Creates payment-plan holds for every item of an order, inside the order's
/// own transaction. Seat items are already RESERVED by the creation path;
/// general-admission items just record a quantity against the zone.
pub async fn create_for_order(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
    items: &[(Uuid, Option<Uuid>, i32)],
    reserved_until: DateTime<Utc>,
) -> Result<(), AppError> {
    for (zone_id, seat_id, quantity) in items {
        sqlx::query(
            "INSERT INTO reserved_tickets (order_id, zone_id, seat_id, quantity, reserved_until) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(order_id)
        .bind(zone_id)
        .bind(seat_id)
        .bind(quantity)
        .bind(reserved_until)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Marks the order's holds COMPLETED without releasing anything; the seats
/// move RESERVED -> SOLD through the completion path itself.
pub async fn complete_for_order(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE reserved_tickets SET status = 'COMPLETED', updated_at = NOW() \
         WHERE order_id = $1 AND status = 'ACTIVE'",
    )
    .bind(order_id)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

/// Cancels a single hold synchronously: the hold row flips to CANCELLED and a
/// seat-backed hold releases its seat back to AVAILABLE. Cancelling an
/// already-settled hold is rejected without state change.
pub async fn cancel(state: &AppState, reservation_id: Uuid) -> Result<ReservedTicket, AppError> {
    let mut tx = state.db.begin().await?;

    let reservation: Option<ReservedTicket> = sqlx::query_as(
        "UPDATE reserved_tickets SET status = 'CANCELLED', updated_at = NOW() \
         WHERE id = $1 AND status = 'ACTIVE' \
         RETURNING *",
    )
    .bind(reservation_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(reservation) = reservation else {
        let existing: Option<ReservedTicket> =
            sqlx::query_as("SELECT * FROM reserved_tickets WHERE id = $1")
                .bind(reservation_id)
                .fetch_optional(&state.db)
                .await?;
        return match existing {
            Some(r) if r.status == ReservationStatus::Completed => Err(AppError::AlreadyCompleted(
                format!("Reservation {reservation_id} already completed"),
            )),
            Some(_) => Err(AppError::AlreadyVoided(format!(
                "Reservation {reservation_id} is no longer active"
            ))),
            None => Err(AppError::NotFound(format!(
                "Reservation {reservation_id} was not found"
            ))),
        };
    };

    if let Some(seat_id) = reservation.seat_id {
        release_seat(&mut tx, seat_id).await?;
    }

    tx.commit().await?;
    invalidate_for(state, &reservation).await?;

    tracing::info!(reservation_id = %reservation_id, order_id = %reservation.order_id, "Reservation cancelled");
    Ok(reservation)
}

async fn release_seat(tx: &mut Transaction<'_, Postgres>, seat_id: Uuid) -> Result<(), AppError> {
    // Guarded transition: only a RESERVED seat goes back to AVAILABLE, so a
    // repeated release cannot clobber a SOLD seat.
    sqlx::query(
        "UPDATE seats SET status = 'AVAILABLE', updated_at = NOW() \
         WHERE id = $1 AND status = 'RESERVED'",
    )
    .bind(seat_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn invalidate_for(state: &AppState, reservation: &ReservedTicket) -> Result<(), AppError> {
    let event_id: Option<(Uuid,)> = sqlx::query_as("SELECT event_id FROM zones WHERE id = $1")
        .bind(reservation.zone_id)
        .fetch_optional(&state.db)
        .await?;
    if let Some((event_id,)) = event_id {
        match reservation.seat_id {
            Some(seat_id) => {
                state
                    .cache
                    .invalidate_seat(seat_id, reservation.zone_id, event_id)
                    .await
            }
            None => state.cache.invalidate_zone(reservation.zone_id, event_id).await,
        }
    }
    Ok(())
}

/// Periodic sweep: expires ACTIVE holds past `reserved_until`, releases their
/// seats, and cancels any parent order whose payment plan has zero completed
/// payments. Status-guarded UPDATEs make repeated or concurrent runs no-ops.
pub async fn sweep_expired(state: &AppState) -> Result<u64, AppError> {
    let mut tx = state.db.begin().await?;

    let expired: Vec<(Uuid, Uuid, Uuid, Option<Uuid>, Uuid)> = sqlx::query_as(
        "UPDATE reserved_tickets SET status = 'EXPIRED', updated_at = NOW() \
         FROM zones \
         WHERE zones.id = reserved_tickets.zone_id \
           AND reserved_tickets.status = 'ACTIVE' \
           AND reserved_tickets.reserved_until <= NOW() \
         RETURNING reserved_tickets.id, reserved_tickets.order_id, \
                   reserved_tickets.zone_id, reserved_tickets.seat_id, zones.event_id",
    )
    .fetch_all(&mut *tx)
    .await?;

    if expired.is_empty() {
        tx.commit().await?;
        return Ok(0);
    }

    let seat_ids: Vec<Uuid> = expired.iter().filter_map(|r| r.3).collect();
    if !seat_ids.is_empty() {
        sqlx::query(
            "UPDATE seats SET status = 'AVAILABLE', updated_at = NOW() \
             WHERE id = ANY($1) AND status = 'RESERVED'",
        )
        .bind(&seat_ids)
        .execute(&mut *tx)
        .await?;
    }

    // Orders with nothing paid lose their hold entirely.
    let mut order_ids: Vec<Uuid> = expired.iter().map(|r| r.1).collect();
    order_ids.sort_unstable();
    order_ids.dedup();

    let mut cancelled = 0u64;
    for order_id in &order_ids {
        let (paid_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM payments WHERE order_id = $1 AND status = 'COMPLETED'",
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        if paid_count == 0 {
            let result = sqlx::query(
                "UPDATE orders SET status = 'CANCELLED', updated_at = NOW() \
                 WHERE id = $1 AND status IN ('PENDING', 'RESERVED')",
            )
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
            cancelled += result.rows_affected();
        }
    }

    tx.commit().await?;

    for (_, _, zone_id, seat_id, event_id) in &expired {
        match seat_id {
            Some(seat_id) => state.cache.invalidate_seat(*seat_id, *zone_id, *event_id).await,
            None => state.cache.invalidate_zone(*zone_id, *event_id).await,
        }
    }

    tracing::info!(
        expired = expired.len(),
        orders_cancelled = cancelled,
        "Expired reservations swept"
    );

    Ok(expired.len() as u64)
}
