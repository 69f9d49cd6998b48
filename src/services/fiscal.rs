use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{FiscalAction, FiscalAuditEntry, FiscalSeriesCounter};
use crate::utils::error::AppError;

/// A fiscal number handed out by the counter, in raw and formatted form.
#[derive(Debug, Clone)]
pub struct IssuedSeries {
    pub number: i64,
    pub formatted: String,
}

/// Postgres error code raised when `lock_timeout` fires while waiting on the
/// counter row.
const LOCK_NOT_AVAILABLE: &str = "55P03";

pub fn is_lock_timeout(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(LOCK_NOT_AVAILABLE),
        _ => false,
    }
}

pub fn format_series(prefix: &str, padding: usize, number: i64) -> String {
    format!("{prefix}-{number:0width$}", width = padding)
}

/// Issues the next consecutive fiscal number for (tenant, event?) inside the
/// caller's transaction, so the increment commits or rolls back together with
/// the order-completion writes that triggered it. All callers serialize on
/// the counter row lock; a lock timeout surfaces as a retryable
/// `FiscalNumbering` error and must never be skipped or satisfied with a
/// previously issued number.
pub async fn next_series(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    event_id: Option<Uuid>,
    order_id: Uuid,
    config: &Config,
) -> Result<IssuedSeries, AppError> {
    // SET does not take bind parameters; the value comes from config, not
    // request input.
    sqlx::query(&format!(
        "SET LOCAL lock_timeout = '{}ms'",
        config.fiscal_lock_timeout_ms
    ))
    .execute(&mut **tx)
    .await?;

    let locked: Option<(i64,)> = sqlx::query_as(
        "SELECT current_series FROM fiscal_counters \
         WHERE tenant_id = $1 AND event_id IS NOT DISTINCT FROM $2 \
         FOR UPDATE",
    )
    .bind(tenant_id)
    .bind(event_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_lock_error)?;

    if locked.is_none() {
        // First number for this slot: seed at 0, then take the row lock. The
        // ON CONFLICT guard makes concurrent seeding harmless.
        sqlx::query(
            "INSERT INTO fiscal_counters (tenant_id, event_id, current_series) \
             VALUES ($1, $2, 0) \
             ON CONFLICT (tenant_id, event_id) DO NOTHING",
        )
        .bind(tenant_id)
        .bind(event_id)
        .execute(&mut **tx)
        .await?;

        let _: (i64,) = sqlx::query_as(
            "SELECT current_series FROM fiscal_counters \
             WHERE tenant_id = $1 AND event_id IS NOT DISTINCT FROM $2 \
             FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(event_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_lock_error)?;
    }

    let (number,): (i64,) = sqlx::query_as(
        "UPDATE fiscal_counters \
         SET current_series = current_series + 1, updated_at = NOW() \
         WHERE tenant_id = $1 AND event_id IS NOT DISTINCT FROM $2 \
         RETURNING current_series",
    )
    .bind(tenant_id)
    .bind(event_id)
    .fetch_one(&mut **tx)
    .await?;

    let formatted = format_series(&config.fiscal_prefix, config.fiscal_padding, number);

    sqlx::query(
        "INSERT INTO fiscal_audit (tenant_id, event_id, order_id, series_number, formatted, action) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(tenant_id)
    .bind(event_id)
    .bind(order_id)
    .bind(number)
    .bind(&formatted)
    .bind(FiscalAction::Issued)
    .execute(&mut **tx)
    .await?;

    tracing::info!(
        tenant_id = %tenant_id,
        order_id = %order_id,
        series = %formatted,
        "Fiscal number issued"
    );

    Ok(IssuedSeries { number, formatted })
}

fn map_lock_error(err: sqlx::Error) -> AppError {
    if is_lock_timeout(&err) {
        AppError::FiscalNumbering("timed out waiting for the fiscal counter lock".to_string())
    } else {
        AppError::DatabaseError(err)
    }
}

/// Records the compensating audit entry for a voided sale. The counter is
/// never rewound and the number is never reused.
pub async fn record_void<'e, E>(
    executor: E,
    tenant_id: Uuid,
    event_id: Option<Uuid>,
    order_id: Uuid,
    series_number: i64,
    formatted: &str,
) -> Result<(), AppError>
where
    E: sqlx::postgres::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO fiscal_audit (tenant_id, event_id, order_id, series_number, formatted, action) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(tenant_id)
    .bind(event_id)
    .bind(order_id)
    .bind(series_number)
    .bind(formatted)
    .bind(FiscalAction::Voided)
    .execute(executor)
    .await?;

    tracing::info!(
        tenant_id = %tenant_id,
        order_id = %order_id,
        series = %formatted,
        "Fiscal number voided"
    );

    Ok(())
}

/// Current counter position for a (tenant, event?) slot. Read-only; never
/// used to allocate a number.
pub async fn current(
    pool: &PgPool,
    tenant_id: Uuid,
    event_id: Option<Uuid>,
) -> Result<Option<FiscalSeriesCounter>, AppError> {
    let counter = sqlx::query_as(
        "SELECT * FROM fiscal_counters \
         WHERE tenant_id = $1 AND event_id IS NOT DISTINCT FROM $2",
    )
    .bind(tenant_id)
    .bind(event_id)
    .fetch_optional(pool)
    .await?;
    Ok(counter)
}

/// Audit trail for one order: its issuance and any later void, oldest first.
pub async fn audit_for_order(
    pool: &PgPool,
    order_id: Uuid,
) -> Result<Vec<FiscalAuditEntry>, AppError> {
    let entries = sqlx::query_as(
        "SELECT * FROM fiscal_audit WHERE order_id = $1 ORDER BY created_at",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(entries)
}

/// Parses the numeric part back out of a formatted series. Used by the void
/// path to audit against the original issuance.
pub fn parse_series_number(formatted: &str) -> Option<i64> {
    formatted.rsplit('-').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_fixed_zero_padding() {
        assert_eq!(format_series("FAC", 8, 1), "FAC-00000001");
        assert_eq!(format_series("FAC", 8, 12345678), "FAC-12345678");
        assert_eq!(format_series("BOL", 6, 42), "BOL-000042");
    }

    #[test]
    fn padding_never_truncates() {
        // Numbers wider than the padding keep all their digits.
        assert_eq!(format_series("FAC", 4, 123456), "FAC-123456");
    }

    #[test]
    fn parse_round_trips_formatting() {
        let formatted = format_series("FAC", 8, 777);
        assert_eq!(parse_series_number(&formatted), Some(777));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_series_number("not-a-series-x"), None);
        assert_eq!(parse_series_number(""), None);
    }
}
