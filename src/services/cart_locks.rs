use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{CartItemLock, SeatStatus};
use crate::services::availability::{effective_available, zone_usage};
use crate::utils::error::AppError;
use crate::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct LockRequest {
    pub zone_id: Uuid,
    pub seat_id: Option<Uuid>,
    /// Ignored for seat requests (seat locks are always quantity 1).
    pub quantity: Option<i32>,
}

/// Per-item result of a `lock_items` call. Failures never abort the batch;
/// each item reports its own outcome.
#[derive(Debug, Clone, Serialize)]
pub struct LockOutcome {
    pub zone_id: Uuid,
    pub seat_id: Option<Uuid>,
    pub quantity: i32,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LockOutcome {
    fn ok(zone_id: Uuid, seat_id: Option<Uuid>, quantity: i32) -> Self {
        Self {
            zone_id,
            seat_id,
            quantity,
            locked: true,
            code: None,
            message: None,
        }
    }

    fn failed(
        zone_id: Uuid,
        seat_id: Option<Uuid>,
        quantity: i32,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            zone_id,
            seat_id,
            quantity,
            locked: false,
            code: Some(code),
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LockReport {
    /// True if at least one lock was created or extended.
    pub success: bool,
    pub locked_count: usize,
    pub results: Vec<LockOutcome>,
}

#[derive(FromRow)]
struct SeatTarget {
    status: SeatStatus,
    zone_id: Uuid,
    event_id: Uuid,
}

#[derive(FromRow)]
struct ZoneTarget {
    capacity: i32,
    seated: bool,
    event_id: Uuid,
}

/// Locks each requested item independently (partial success): items that
/// fail are reported per item while the rest stay locked.
pub async fn lock_items(
    state: &AppState,
    session_key: &str,
    requests: Vec<LockRequest>,
) -> Result<LockReport, AppError> {
    if session_key.trim().is_empty() {
        return Err(AppError::ValidationError("session_key is required".to_string()));
    }
    if requests.is_empty() {
        return Err(AppError::ValidationError("at least one item is required".to_string()));
    }

    let mut results = Vec::with_capacity(requests.len());
    for request in requests {
        let outcome = match request.seat_id {
            Some(seat_id) => lock_seat(state, session_key, request.zone_id, seat_id).await?,
            None => {
                let quantity = request.quantity.unwrap_or(1);
                lock_general_admission(state, session_key, request.zone_id, quantity).await?
            }
        };
        results.push(outcome);
    }

    let locked_count = results.iter().filter(|r| r.locked).count();
    tracing::debug!(
        session = %session_key,
        locked = locked_count,
        requested = results.len(),
        "Cart lock batch processed"
    );

    Ok(LockReport {
        success: locked_count > 0,
        locked_count,
        results,
    })
}

async fn lock_seat(
    state: &AppState,
    session_key: &str,
    zone_id: Uuid,
    seat_id: Uuid,
) -> Result<LockOutcome, AppError> {
    let mut tx = state.db.begin().await?;

    let target: Option<SeatTarget> = sqlx::query_as(
        "SELECT s.status, s.zone_id, z.event_id \
         FROM seats s JOIN zones z ON z.id = s.zone_id \
         WHERE s.id = $1",
    )
    .bind(seat_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(target) = target else {
        return Ok(LockOutcome::failed(
            zone_id,
            Some(seat_id),
            1,
            "NOT_FOUND",
            format!("Seat {seat_id} was not found"),
        ));
    };
    if target.zone_id != zone_id {
        return Ok(LockOutcome::failed(
            zone_id,
            Some(seat_id),
            1,
            "VALIDATION_ERROR",
            format!("Seat {seat_id} does not belong to zone {zone_id}"),
        ));
    }

    // Stale ACTIVE locks block the partial unique index until the sweep runs;
    // expire them inline so the write path is never held up by a dead hold.
    sqlx::query(
        "UPDATE cart_item_locks SET status = 'EXPIRED', updated_at = NOW() \
         WHERE seat_id = $1 AND status = 'ACTIVE' AND expires_at <= NOW()",
    )
    .bind(seat_id)
    .execute(&mut *tx)
    .await?;

    // Re-selection by the same session extends the existing hold.
    let own: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM cart_item_locks \
         WHERE seat_id = $1 AND session_key = $2 AND status = 'ACTIVE' AND expires_at > NOW()",
    )
    .bind(seat_id)
    .bind(session_key)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some((lock_id,)) = own {
        sqlx::query(
            "UPDATE cart_item_locks SET expires_at = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(lock_id)
        .bind(Utc::now() + state.config.cart_lock_ttl)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        state
            .cache
            .invalidate_seat(seat_id, zone_id, target.event_id)
            .await;
        return Ok(LockOutcome::ok(zone_id, Some(seat_id), 1));
    }

    let conflicting: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM cart_item_locks \
         WHERE seat_id = $1 AND session_key <> $2 AND status = 'ACTIVE' AND expires_at > NOW()",
    )
    .bind(seat_id)
    .bind(session_key)
    .fetch_optional(&mut *tx)
    .await?;
    if conflicting.is_some() {
        return Ok(LockOutcome::failed(
            zone_id,
            Some(seat_id),
            1,
            "LOCK_CONFLICT",
            format!("Seat {seat_id} is held by another session"),
        ));
    }

    if target.status != SeatStatus::Available {
        return Ok(LockOutcome::failed(
            zone_id,
            Some(seat_id),
            1,
            "CAPACITY_EXCEEDED",
            format!("Seat {seat_id} is no longer available"),
        ));
    }

    if active_lock_count(&mut *tx, session_key).await? >= state.config.session_lock_cap {
        return Ok(LockOutcome::failed(
            zone_id,
            Some(seat_id),
            1,
            "LOCK_LIMIT_REACHED",
            "Session holds the maximum number of concurrent locks",
        ));
    }

    let inserted = sqlx::query(
        "INSERT INTO cart_item_locks (session_key, zone_id, seat_id, quantity, expires_at) \
         VALUES ($1, $2, $3, 1, $4)",
    )
    .bind(session_key)
    .bind(zone_id)
    .bind(seat_id)
    .bind(Utc::now() + state.config.cart_lock_ttl)
    .execute(&mut *tx)
    .await;

    match inserted {
        Ok(_) => {
            tx.commit().await?;
            state
                .cache
                .invalidate_seat(seat_id, zone_id, target.event_id)
                .await;
            Ok(LockOutcome::ok(zone_id, Some(seat_id), 1))
        }
        // Another session won the partial unique index race.
        Err(err) if is_unique_violation(&err) => Ok(LockOutcome::failed(
            zone_id,
            Some(seat_id),
            1,
            "LOCK_CONFLICT",
            format!("Seat {seat_id} is held by another session"),
        )),
        Err(err) => Err(err.into()),
    }
}

async fn lock_general_admission(
    state: &AppState,
    session_key: &str,
    zone_id: Uuid,
    quantity: i32,
) -> Result<LockOutcome, AppError> {
    if quantity <= 0 {
        return Ok(LockOutcome::failed(
            zone_id,
            None,
            quantity,
            "VALIDATION_ERROR",
            "quantity must be positive",
        ));
    }

    let mut tx = state.db.begin().await?;

    // The zone row lock serializes competing capacity computations so two
    // concurrent requests cannot both fit into the same remainder.
    let target: Option<ZoneTarget> = sqlx::query_as(
        "SELECT capacity, seated, event_id FROM zones WHERE id = $1 FOR UPDATE",
    )
    .bind(zone_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(target) = target else {
        return Ok(LockOutcome::failed(
            zone_id,
            None,
            quantity,
            "NOT_FOUND",
            format!("Zone {zone_id} was not found"),
        ));
    };
    if target.seated {
        return Ok(LockOutcome::failed(
            zone_id,
            None,
            quantity,
            "VALIDATION_ERROR",
            "Seated zones require a seat selection",
        ));
    }

    // The session's own lock is excluded so re-selection rebalances it
    // instead of competing with it.
    let usage = zone_usage(&mut *tx, zone_id, Some(session_key)).await?;
    let available = effective_available(i64::from(target.capacity), usage);
    if i64::from(quantity) > available {
        return Ok(LockOutcome::failed(
            zone_id,
            None,
            quantity,
            "CAPACITY_EXCEEDED",
            format!("Only {available} remaining in zone"),
        ));
    }

    let own: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM cart_item_locks \
         WHERE session_key = $1 AND zone_id = $2 AND seat_id IS NULL \
           AND status = 'ACTIVE' AND expires_at > NOW()",
    )
    .bind(session_key)
    .bind(zone_id)
    .fetch_optional(&mut *tx)
    .await?;

    let expires_at = Utc::now() + state.config.cart_lock_ttl;
    if let Some((lock_id,)) = own {
        sqlx::query(
            "UPDATE cart_item_locks SET quantity = $2, expires_at = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(lock_id)
        .bind(quantity)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
    } else {
        if active_lock_count(&mut *tx, session_key).await? >= state.config.session_lock_cap {
            return Ok(LockOutcome::failed(
                zone_id,
                None,
                quantity,
                "LOCK_LIMIT_REACHED",
                "Session holds the maximum number of concurrent locks",
            ));
        }
        sqlx::query(
            "INSERT INTO cart_item_locks (session_key, zone_id, seat_id, quantity, expires_at) \
             VALUES ($1, $2, NULL, $3, $4)",
        )
        .bind(session_key)
        .bind(zone_id)
        .bind(quantity)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    state.cache.invalidate_zone(zone_id, target.event_id).await;
    Ok(LockOutcome::ok(zone_id, None, quantity))
}

async fn active_lock_count<'e, E>(executor: E, session_key: &str) -> Result<i64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM cart_item_locks \
         WHERE session_key = $1 AND status = 'ACTIVE' AND expires_at > NOW()",
    )
    .bind(session_key)
    .fetch_one(executor)
    .await?;
    Ok(count)
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

/// Lists the session's live locks, oldest first.
pub async fn list_locks(state: &AppState, session_key: &str) -> Result<Vec<CartItemLock>, AppError> {
    let locks = sqlx::query_as(
        "SELECT * FROM cart_item_locks \
         WHERE session_key = $1 AND status = 'ACTIVE' AND expires_at > NOW() \
         ORDER BY created_at",
    )
    .bind(session_key)
    .fetch_all(&state.db)
    .await?;
    Ok(locks)
}

/// Releases the session's ACTIVE locks (all of them, or the listed ids).
/// Already-released or expired locks are skipped, not errors.
pub async fn release_locks(
    state: &AppState,
    session_key: &str,
    lock_ids: Option<Vec<Uuid>>,
) -> Result<u64, AppError> {
    let released: Vec<(Uuid, Option<Uuid>, Uuid)> = sqlx::query_as(
        "UPDATE cart_item_locks SET status = 'RELEASED', updated_at = NOW() \
         FROM zones \
         WHERE zones.id = cart_item_locks.zone_id \
           AND cart_item_locks.session_key = $1 \
           AND cart_item_locks.status = 'ACTIVE' \
           AND ($2::UUID[] IS NULL OR cart_item_locks.id = ANY($2)) \
         RETURNING cart_item_locks.zone_id, cart_item_locks.seat_id, zones.event_id",
    )
    .bind(session_key)
    .bind(lock_ids)
    .fetch_all(&state.db)
    .await?;

    for (zone_id, seat_id, event_id) in &released {
        match seat_id {
            Some(seat_id) => state.cache.invalidate_seat(*seat_id, *zone_id, *event_id).await,
            None => state.cache.invalidate_zone(*zone_id, *event_id).await,
        }
    }

    Ok(released.len() as u64)
}

/// Pushes the expiry of the session's live locks `minutes` out from now.
/// Extending an expired or released lock is a no-op.
pub async fn extend_locks(
    state: &AppState,
    session_key: &str,
    minutes: i32,
) -> Result<u64, AppError> {
    if minutes <= 0 {
        return Err(AppError::ValidationError("minutes must be positive".to_string()));
    }

    let result = sqlx::query(
        "UPDATE cart_item_locks \
         SET expires_at = NOW() + make_interval(mins => $2), updated_at = NOW() \
         WHERE session_key = $1 AND status = 'ACTIVE' AND expires_at > NOW()",
    )
    .bind(session_key)
    .bind(minutes)
    .execute(&state.db)
    .await?;

    Ok(result.rows_affected())
}

/// Marks the session's ACTIVE locks CONVERTED inside the checkout
/// transaction, so the expiry sweep ignores them from that moment on.
pub async fn convert_locks<'e, E>(
    executor: E,
    session_key: &str,
) -> Result<Vec<(Uuid, Option<Uuid>)>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as(
        "UPDATE cart_item_locks SET status = 'CONVERTED', updated_at = NOW() \
         WHERE session_key = $1 AND status = 'ACTIVE' \
         RETURNING zone_id, seat_id",
    )
    .bind(session_key)
    .fetch_all(executor)
    .await
}

/// Periodic sweep: flips lapsed ACTIVE locks to EXPIRED and invalidates the
/// affected cache entries. The status guard in the UPDATE makes concurrent
/// or repeated runs no-ops over the same rows.
pub async fn sweep_expired(state: &AppState) -> Result<u64, AppError> {
    let expired: Vec<(Uuid, Option<Uuid>, Uuid)> = sqlx::query_as(
        "UPDATE cart_item_locks SET status = 'EXPIRED', updated_at = NOW() \
         FROM zones \
         WHERE zones.id = cart_item_locks.zone_id \
           AND cart_item_locks.status = 'ACTIVE' \
           AND cart_item_locks.expires_at <= NOW() \
         RETURNING cart_item_locks.zone_id, cart_item_locks.seat_id, zones.event_id",
    )
    .fetch_all(&state.db)
    .await?;

    for (zone_id, seat_id, event_id) in &expired {
        match seat_id {
            Some(seat_id) => state.cache.invalidate_seat(*seat_id, *zone_id, *event_id).await,
            None => state.cache.invalidate_zone(*zone_id, *event_id).await,
        }
    }

    if !expired.is_empty() {
        tracing::info!(count = expired.len(), "Expired cart locks swept");
    }

    Ok(expired.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome_ok() -> LockOutcome {
        LockOutcome::ok(Uuid::new_v4(), None, 2)
    }

    fn outcome_failed(code: &'static str) -> LockOutcome {
        LockOutcome::failed(Uuid::new_v4(), None, 2, code, "nope")
    }

    #[test]
    fn batch_succeeds_when_any_item_locks() {
        let results = vec![outcome_ok(), outcome_failed("CAPACITY_EXCEEDED")];
        let locked_count = results.iter().filter(|r| r.locked).count();
        let report = LockReport {
            success: locked_count > 0,
            locked_count,
            results,
        };
        assert!(report.success);
        assert_eq!(report.locked_count, 1);
    }

    #[test]
    fn batch_fails_when_nothing_locks() {
        let results = vec![
            outcome_failed("LOCK_CONFLICT"),
            outcome_failed("CAPACITY_EXCEEDED"),
        ];
        let locked_count = results.iter().filter(|r| r.locked).count();
        assert_eq!(locked_count, 0);
    }

    #[test]
    fn failed_outcome_carries_code_and_message() {
        let outcome = LockOutcome::failed(Uuid::new_v4(), None, 6, "CAPACITY_EXCEEDED", "Only 4 remaining in zone");
        assert!(!outcome.locked);
        assert_eq!(outcome.code, Some("CAPACITY_EXCEEDED"));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["message"], "Only 4 remaining in zone");
    }

    #[test]
    fn successful_outcome_omits_error_fields() {
        let json = serde_json::to_value(outcome_ok()).unwrap();
        assert!(json.get("code").is_none());
        assert!(json.get("message").is_none());
    }
}
