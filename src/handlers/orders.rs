use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::PaymentStatus;
use crate::services::fiscal;
use crate::services::orders::{self, CreateOrderRequest};
use crate::utils::error::AppError;
use crate::utils::response::{created, success};
use crate::AppState;

pub async fn create_order(
    State(state): State<AppState>,
    Json(body): Json<CreateOrderRequest>,
) -> Result<Response, AppError> {
    let order = orders::create_order(&state, body).await?;
    if order.replayed {
        Ok(success(order, "Order already created").into_response())
    } else {
        Ok(created(order, "Order created").into_response())
    }
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let order = orders::load_order(&state, order_id).await?;
    Ok(success(order, "Order").into_response())
}

pub async fn complete_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let order = orders::complete_order(&state, order_id).await?;
    Ok(success(order, "Order completed").into_response())
}

pub async fn void_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let order = orders::void_order(&state, order_id).await?;
    Ok(success(order, "Order voided").into_response())
}

pub async fn get_fiscal_audit(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let entries = fiscal::audit_for_order(&state.db, order_id).await?;
    Ok(success(entries, "Fiscal audit trail").into_response())
}

pub async fn get_fiscal_counter(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let counter = fiscal::current(&state.db, tenant_id, None)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("No fiscal counter exists for tenant {tenant_id}"))
        })?;
    Ok(success(counter, "Fiscal counter").into_response())
}

#[derive(Deserialize)]
pub struct PaymentBody {
    pub amount: Decimal,
    pub status: PaymentStatus,
}

/// Payment-completion callback from the Payments module.
pub async fn record_payment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<PaymentBody>,
) -> Result<Response, AppError> {
    let payment = orders::record_payment(&state, order_id, body.amount, body.status).await?;
    Ok(created(payment, "Payment recorded").into_response())
}
