use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row per (tenant, event?) pair. `current_series` only ever moves
/// forward, and only under `next_series`'s row lock.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FiscalSeriesCounter {
    pub tenant_id: Uuid,
    pub event_id: Option<Uuid>,
    pub current_series: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "fiscal_action", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FiscalAction {
    Issued,
    Voided,
}

/// Append-only audit trail: every issuance and void lands here, voids never
/// rewind the counter.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FiscalAuditEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_id: Option<Uuid>,
    pub order_id: Uuid,
    pub series_number: i64,
    pub formatted: String,
    pub action: FiscalAction,
    pub created_at: DateTime<Utc>,
}
