use crate::services::{cart_locks, reservations};
use crate::AppState;

/// Spawns the periodic expiry sweep. Each tick expires lapsed cart locks and
/// reservations, purges dead idempotency keys, and evicts stale cache
/// entries. Every step is status-guarded in SQL, so an overlapping or
/// repeated run releases nothing twice.
pub fn spawn_expiry_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_sweep(&state).await;
        }
    });
}

async fn run_sweep(state: &AppState) {
    if let Err(err) = cart_locks::sweep_expired(state).await {
        tracing::error!(?err, "Cart lock sweep failed");
    }
    if let Err(err) = reservations::sweep_expired(state).await {
        tracing::error!(?err, "Reservation sweep failed");
    }
    if let Err(err) = purge_idempotency_keys(state).await {
        tracing::error!(?err, "Idempotency key purge failed");
    }
    state.cache.evict_expired().await;
}

async fn purge_idempotency_keys(state: &AppState) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= NOW()")
        .execute(&state.db)
        .await?;
    let purged = result.rows_affected();
    if purged > 0 {
        tracing::debug!(purged, "Stale idempotency keys purged");
    }
    Ok(purged)
}
