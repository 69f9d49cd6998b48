use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{Order, OrderItem, OrderStatus, Payment, PaymentStatus, SeatStatus};
use crate::services::availability::{effective_available, zone_usage};
use crate::services::{cart_locks, fiscal, reservations};
use crate::utils::error::AppError;
use crate::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderItemRequest {
    pub zone_id: Uuid,
    pub seat_id: Option<Uuid>,
    pub quantity: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    /// Client-supplied token; retried requests with the same key return the
    /// original order instead of creating another.
    pub idempotency_key: String,
    pub tenant_id: Uuid,
    pub event_id: Uuid,
    pub customer_id: Uuid,
    /// When set, the session's cart locks are converted as part of checkout.
    pub session_key: Option<String>,
    /// When set, the order enters RESERVED with payment-plan holds until
    /// this instant instead of plain PENDING.
    pub reserve_until: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// True when this response replays a previously created order.
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NormalizedItem {
    zone_id: Uuid,
    seat_id: Option<Uuid>,
    quantity: i32,
}

fn normalize_items(items: &[OrderItemRequest]) -> Result<Vec<NormalizedItem>, AppError> {
    if items.is_empty() {
        return Err(AppError::ValidationError(
            "an order requires at least one item".to_string(),
        ));
    }

    let mut normalized = Vec::with_capacity(items.len());
    for item in items {
        let quantity = item.quantity.unwrap_or(1);
        if item.seat_id.is_some() && quantity != 1 {
            return Err(AppError::ValidationError(
                "seat items always have quantity 1".to_string(),
            ));
        }
        if quantity <= 0 {
            return Err(AppError::ValidationError(
                "item quantity must be positive".to_string(),
            ));
        }
        normalized.push(NormalizedItem {
            zone_id: item.zone_id,
            seat_id: item.seat_id,
            quantity,
        });
    }

    let mut seats: Vec<Uuid> = normalized.iter().filter_map(|i| i.seat_id).collect();
    seats.sort_unstable();
    let len_before = seats.len();
    seats.dedup();
    if seats.len() != len_before {
        return Err(AppError::ValidationError(
            "duplicate seat in order items".to_string(),
        ));
    }

    // Stable lock order across concurrent orders keeps row-lock acquisition
    // deadlock-free.
    normalized.sort_by_key(|i| (i.zone_id, i.seat_id));
    Ok(normalized)
}

/// Claims the idempotency key for a new order. A live key conflicts (zero
/// rows affected) and the caller replays the mapped order; a key past its
/// TTL that the sweep has not purged yet is reclaimed in place, so a retry
/// after expiry is treated as a brand-new request.
const CLAIM_IDEMPOTENCY_KEY_SQL: &str =
    "INSERT INTO idempotency_keys (key, order_id, expires_at) \
     VALUES ($1, $2, NOW() + $3::INTERVAL) \
     ON CONFLICT (key) DO UPDATE \
     SET order_id = EXCLUDED.order_id, expires_at = EXCLUDED.expires_at \
     WHERE idempotency_keys.expires_at <= NOW()";

#[derive(FromRow)]
struct ZonePricing {
    tenant_id: Uuid,
    event_id: Uuid,
    capacity: i32,
    unit_price: Decimal,
    seated: bool,
}

/// Idempotent order creation (all-or-nothing). The idempotency key is
/// claimed with an in-transaction `INSERT ... ON CONFLICT DO NOTHING`; a
/// concurrent request that loses the claim rolls back and returns the
/// winner's order. Seat availability is verified under row locks; any
/// capacity failure aborts the whole request with no partial writes.
pub async fn create_order(
    state: &AppState,
    request: CreateOrderRequest,
) -> Result<OrderWithItems, AppError> {
    if request.idempotency_key.trim().is_empty() {
        return Err(AppError::ValidationError(
            "idempotency_key is required".to_string(),
        ));
    }
    let items = normalize_items(&request.items)?;

    // Fast path: a settled retry returns the mapped order without writes.
    if let Some(existing) = lookup_idempotent(state, &request.idempotency_key).await? {
        return Ok(existing);
    }

    let order_id = Uuid::new_v4();
    let mut tx = state.db.begin().await?;

    let claim = sqlx::query(CLAIM_IDEMPOTENCY_KEY_SQL)
        .bind(&request.idempotency_key)
        .bind(order_id)
        .bind(format!("{} seconds", state.config.idempotency_ttl.as_secs()))
        .execute(&mut *tx)
        .await?;

    if claim.rows_affected() == 0 {
        // A concurrent creator committed this key first.
        tx.rollback().await?;
        if let Some(existing) = lookup_idempotent(state, &request.idempotency_key).await? {
            return Ok(existing);
        }
        return Err(AppError::InternalServerError(
            "idempotency key already claimed but its order is missing".to_string(),
        ));
    }

    let mut total_amount = Decimal::ZERO;
    let mut priced_items: Vec<(NormalizedItem, Decimal)> = Vec::with_capacity(items.len());
    let mut seat_ids: Vec<Uuid> = Vec::new();

    for item in items {
        let zone: Option<ZonePricing> = if item.seat_id.is_some() {
            sqlx::query_as(
                "SELECT tenant_id, event_id, capacity, unit_price, seated \
                 FROM zones WHERE id = $1",
            )
            .bind(item.zone_id)
            .fetch_optional(&mut *tx)
            .await?
        } else {
            // GA capacity math needs the zone row locked so two concurrent
            // orders cannot both fit into the same remainder.
            sqlx::query_as(
                "SELECT tenant_id, event_id, capacity, unit_price, seated \
                 FROM zones WHERE id = $1 FOR UPDATE",
            )
            .bind(item.zone_id)
            .fetch_optional(&mut *tx)
            .await?
        };

        let Some(zone) = zone else {
            return Err(AppError::NotFound(format!(
                "Zone {} was not found",
                item.zone_id
            )));
        };
        if zone.event_id != request.event_id || zone.tenant_id != request.tenant_id {
            return Err(AppError::ValidationError(format!(
                "Zone {} does not belong to this event",
                item.zone_id
            )));
        }

        match item.seat_id {
            Some(seat_id) => {
                let seat: Option<(SeatStatus,)> = sqlx::query_as(
                    "SELECT status FROM seats WHERE id = $1 AND zone_id = $2 FOR UPDATE",
                )
                .bind(seat_id)
                .bind(item.zone_id)
                .fetch_optional(&mut *tx)
                .await?;

                match seat {
                    None => {
                        return Err(AppError::ValidationError(format!(
                            "Seat {seat_id} does not belong to zone {}",
                            item.zone_id
                        )))
                    }
                    Some((SeatStatus::Available,)) => {}
                    Some(_) => {
                        return Err(AppError::CapacityExceeded(format!(
                            "Seat {seat_id} is no longer available"
                        )))
                    }
                }

                // An advisory browsing lock held by someone else blocks the
                // sale even though the seat row is still AVAILABLE.
                let holder: Option<(String,)> = sqlx::query_as(
                    "SELECT session_key FROM cart_item_locks \
                     WHERE seat_id = $1 AND status = 'ACTIVE' AND expires_at > NOW()",
                )
                .bind(seat_id)
                .fetch_optional(&mut *tx)
                .await?;
                if let Some((holder,)) = holder {
                    if request.session_key.as_deref() != Some(holder.as_str()) {
                        return Err(AppError::LockConflict(format!(
                            "Seat {seat_id} is held by another session"
                        )));
                    }
                }

                seat_ids.push(seat_id);
            }
            None => {
                if zone.seated {
                    return Err(AppError::ValidationError(format!(
                        "Zone {} requires seat selection",
                        item.zone_id
                    )));
                }
                // The session's own cart locks are excluded: they convert to
                // this order in the same transaction, so counting them too
                // would double-subtract.
                let usage =
                    zone_usage(&mut *tx, item.zone_id, request.session_key.as_deref()).await?;
                let available = effective_available(i64::from(zone.capacity), usage);
                if i64::from(item.quantity) > available {
                    return Err(AppError::CapacityExceeded(format!(
                        "Zone {} has only {available} remaining",
                        item.zone_id
                    )));
                }
            }
        }

        total_amount += zone.unit_price * Decimal::from(item.quantity);
        priced_items.push((item, zone.unit_price));
    }

    let status = if request.reserve_until.is_some() {
        OrderStatus::Reserved
    } else {
        OrderStatus::Pending
    };

    let order: Order = sqlx::query_as(
        "INSERT INTO orders (id, tenant_id, event_id, customer_id, status, total_amount) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(order_id)
    .bind(request.tenant_id)
    .bind(request.event_id)
    .bind(request.customer_id)
    .bind(status)
    .bind(total_amount)
    .fetch_one(&mut *tx)
    .await?;

    let mut order_items = Vec::with_capacity(priced_items.len());
    for (item, unit_price) in &priced_items {
        let total_price = *unit_price * Decimal::from(item.quantity);
        let row: OrderItem = sqlx::query_as(
            "INSERT INTO order_items (order_id, zone_id, seat_id, quantity, unit_price, total_price) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING *",
        )
        .bind(order_id)
        .bind(item.zone_id)
        .bind(item.seat_id)
        .bind(item.quantity)
        .bind(unit_price)
        .bind(total_price)
        .fetch_one(&mut *tx)
        .await?;
        order_items.push(row);
    }

    if !seat_ids.is_empty() {
        sqlx::query(
            "UPDATE seats SET status = 'RESERVED', updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(&seat_ids)
        .execute(&mut *tx)
        .await?;
    }

    if let Some(session_key) = request.session_key.as_deref() {
        cart_locks::convert_locks(&mut *tx, session_key).await?;
    }

    if let Some(reserved_until) = request.reserve_until {
        let holds: Vec<(Uuid, Option<Uuid>, i32)> = priced_items
            .iter()
            .map(|(item, _)| (item.zone_id, item.seat_id, item.quantity))
            .collect();
        reservations::create_for_order(&mut tx, order_id, &holds, reserved_until).await?;
    }

    tx.commit().await?;

    state
        .cache
        .invalidate_items(
            request.event_id,
            priced_items.iter().map(|(item, _)| (item.zone_id, item.seat_id)),
        )
        .await;

    tracing::info!(
        order_id = %order_id,
        tenant_id = %request.tenant_id,
        items = order_items.len(),
        total = %total_amount,
        "Order created"
    );

    Ok(OrderWithItems {
        order,
        items: order_items,
        replayed: false,
    })
}

async fn lookup_idempotent(
    state: &AppState,
    key: &str,
) -> Result<Option<OrderWithItems>, AppError> {
    let mapped: Option<(Uuid,)> = sqlx::query_as(
        "SELECT order_id FROM idempotency_keys WHERE key = $1 AND expires_at > NOW()",
    )
    .bind(key)
    .fetch_optional(&state.db)
    .await?;

    let Some((order_id,)) = mapped else {
        return Ok(None);
    };

    let mut existing = load_order(state, order_id).await?;
    existing.replayed = true;
    tracing::debug!(order_id = %order_id, "Idempotent replay");
    Ok(Some(existing))
}

pub async fn load_order(state: &AppState, order_id: Uuid) -> Result<OrderWithItems, AppError> {
    let order: Order = sqlx::query_as("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {order_id} was not found")))?;

    let items: Vec<OrderItem> =
        sqlx::query_as("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id")
            .bind(order_id)
            .fetch_all(&state.db)
            .await?;

    Ok(OrderWithItems {
        order,
        items,
        replayed: false,
    })
}

/// Completes an order: verifies the payment total, issues the fiscal number
/// inside the same transaction as the status flip, and moves the seats to
/// SOLD. A fiscal counter lock timeout rolls everything back and retries
/// with backoff up to the configured bound before surfacing the failure —
/// never skipped, never reusing a prior number.
pub async fn complete_order(state: &AppState, order_id: Uuid) -> Result<OrderWithItems, AppError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match try_complete(state, order_id).await {
            Err(err @ AppError::FiscalNumbering(_)) => {
                if attempt >= state.config.fiscal_retry_attempts {
                    tracing::error!(order_id = %order_id, attempts = attempt, "Fiscal numbering failed after retries");
                    return Err(err);
                }
                let backoff = std::time::Duration::from_millis(100 * u64::from(attempt));
                tracing::warn!(order_id = %order_id, attempt, ?backoff, "Fiscal counter busy, retrying");
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}

async fn try_complete(state: &AppState, order_id: Uuid) -> Result<OrderWithItems, AppError> {
    let mut tx = state.db.begin().await?;

    let order: Order = sqlx::query_as("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {order_id} was not found")))?;

    match order.status {
        OrderStatus::Pending | OrderStatus::Reserved => {}
        OrderStatus::Completed => {
            return Err(AppError::AlreadyCompleted(format!(
                "Order {order_id} is already completed"
            )))
        }
        OrderStatus::Cancelled | OrderStatus::Refunded => {
            return Err(AppError::AlreadyVoided(format!(
                "Order {order_id} has been voided"
            )))
        }
    }

    // Payment validation: the sum of completed payments must cover the total
    // before a fiscal number may be issued.
    let (paid,): (Decimal,) = sqlx::query_as(
        "SELECT COALESCE(SUM(amount), 0) FROM payments \
         WHERE order_id = $1 AND status = 'COMPLETED'",
    )
    .bind(order_id)
    .fetch_one(&mut *tx)
    .await?;

    if paid < order.total_amount {
        return Err(AppError::PaymentIncomplete(format!(
            "paid {paid} of {}",
            order.total_amount
        )));
    }

    // The legal series is tenant-wide; event-scoped counters stay available
    // through the fiscal service API.
    let issued = fiscal::next_series(&mut tx, order.tenant_id, None, order_id, &state.config).await?;

    let order: Order = sqlx::query_as(
        "UPDATE orders \
         SET fiscal_series = $2, status = 'COMPLETED', completed_at = NOW(), updated_at = NOW() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(order_id)
    .bind(&issued.formatted)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE seats SET status = 'SOLD', updated_at = NOW() \
         WHERE status = 'RESERVED' AND id IN \
           (SELECT seat_id FROM order_items WHERE order_id = $1 AND seat_id IS NOT NULL)",
    )
    .bind(order_id)
    .execute(&mut *tx)
    .await?;

    reservations::complete_for_order(&mut tx, order_id).await?;

    tx.commit().await?;

    let completed = load_order(state, order_id).await?;
    state
        .cache
        .invalidate_items(
            order.event_id,
            completed.items.iter().map(|i| (i.zone_id, i.seat_id)),
        )
        .await;

    tracing::info!(
        order_id = %order_id,
        fiscal_series = %issued.formatted,
        "Order completed"
    );

    Ok(completed)
}

/// Voids a completed sale. The fiscal number stays on the order forever; the
/// void is a separate compensating audit entry, never a renumbering.
pub async fn void_order(state: &AppState, order_id: Uuid) -> Result<OrderWithItems, AppError> {
    let mut tx = state.db.begin().await?;

    let order: Order = sqlx::query_as("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {order_id} was not found")))?;

    match order.status {
        OrderStatus::Completed => {}
        OrderStatus::Cancelled | OrderStatus::Refunded => {
            return Err(AppError::AlreadyVoided(format!(
                "Order {order_id} has already been voided"
            )))
        }
        OrderStatus::Pending | OrderStatus::Reserved => {
            return Err(AppError::ValidationError(format!(
                "Order {order_id} is not completed; cancel it instead"
            )))
        }
    }

    let Some(formatted) = order.fiscal_series.clone() else {
        return Err(AppError::InternalServerError(format!(
            "Completed order {order_id} has no fiscal series"
        )));
    };
    let series_number: Option<(i64,)> = sqlx::query_as(
        "SELECT series_number FROM fiscal_audit \
         WHERE order_id = $1 AND action = 'ISSUED' \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(order_id)
    .fetch_optional(&mut *tx)
    .await?;
    let series_number = series_number
        .map(|(n,)| n)
        .or_else(|| fiscal::parse_series_number(&formatted))
        .unwrap_or(0);

    sqlx::query("UPDATE orders SET status = 'REFUNDED', updated_at = NOW() WHERE id = $1")
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

    fiscal::record_void(
        &mut *tx,
        order.tenant_id,
        None,
        order_id,
        series_number,
        &formatted,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(order_id = %order_id, fiscal_series = %formatted, "Order voided");
    load_order(state, order_id).await
}

/// Records a payment-completion callback from the Payments module. Recording
/// never completes the order by itself; completion stays an explicit call.
pub async fn record_payment(
    state: &AppState,
    order_id: Uuid,
    amount: Decimal,
    status: PaymentStatus,
) -> Result<Payment, AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::ValidationError(
            "payment amount must be positive".to_string(),
        ));
    }

    let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(AppError::NotFound(format!("Order {order_id} was not found")));
    }

    let payment: Payment = sqlx::query_as(
        "INSERT INTO payments (order_id, amount, status) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(order_id)
    .bind(amount)
    .bind(status)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(order_id = %order_id, amount = %amount, status = ?status, "Payment recorded");
    Ok(payment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn seat_item(zone: Uuid, seat: Uuid) -> OrderItemRequest {
        OrderItemRequest {
            zone_id: zone,
            seat_id: Some(seat),
            quantity: None,
        }
    }

    #[test]
    fn empty_orders_are_rejected() {
        assert!(matches!(
            normalize_items(&[]),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn seat_items_must_have_quantity_one() {
        let item = OrderItemRequest {
            zone_id: Uuid::new_v4(),
            seat_id: Some(Uuid::new_v4()),
            quantity: Some(2),
        };
        assert!(matches!(
            normalize_items(&[item]),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn duplicate_seats_are_rejected() {
        let zone = Uuid::new_v4();
        let seat = Uuid::new_v4();
        assert!(matches!(
            normalize_items(&[seat_item(zone, seat), seat_item(zone, seat)]),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let item = OrderItemRequest {
            zone_id: Uuid::new_v4(),
            seat_id: None,
            quantity: Some(0),
        };
        assert!(matches!(
            normalize_items(&[item]),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn items_sort_into_stable_lock_order() {
        let zone_a = Uuid::from_u128(1);
        let zone_b = Uuid::from_u128(2);
        let items = [
            OrderItemRequest {
                zone_id: zone_b,
                seat_id: None,
                quantity: Some(3),
            },
            seat_item(zone_a, Uuid::from_u128(9)),
        ];
        let normalized = normalize_items(&items).unwrap();
        assert_eq!(normalized[0].zone_id, zone_a);
        assert_eq!(normalized[1].zone_id, zone_b);
    }

    #[test]
    fn quantity_defaults_to_one() {
        let item = OrderItemRequest {
            zone_id: Uuid::new_v4(),
            seat_id: None,
            quantity: None,
        };
        let normalized = normalize_items(&[item]).unwrap();
        assert_eq!(normalized[0].quantity, 1);
    }

    #[test]
    fn expired_idempotency_keys_are_reclaimed_by_the_claim() {
        // A key past its TTL that the sweep has not purged yet must not
        // block a retry: the claim takes the row over, it never degrades to
        // a bare DO NOTHING that would strand the request.
        assert!(CLAIM_IDEMPOTENCY_KEY_SQL.contains("ON CONFLICT (key) DO UPDATE"));
        assert!(CLAIM_IDEMPOTENCY_KEY_SQL
            .contains("WHERE idempotency_keys.expires_at <= NOW()"));
    }

    #[test]
    fn line_totals_multiply_price_by_quantity() {
        let unit = dec!(25.50);
        let total = unit * Decimal::from(4);
        assert_eq!(total, dec!(102.00));
    }
}
