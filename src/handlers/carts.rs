use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::cart_locks::{self, LockRequest};
use crate::utils::error::AppError;
use crate::utils::response::success;
use crate::AppState;

#[derive(Deserialize)]
pub struct LockItemsBody {
    pub session_key: String,
    pub items: Vec<LockRequest>,
}

#[derive(Deserialize)]
pub struct ReleaseBody {
    pub session_key: String,
    /// Omit to release everything the session holds.
    pub lock_ids: Option<Vec<Uuid>>,
}

#[derive(Deserialize)]
pub struct ExtendBody {
    pub session_key: String,
    pub minutes: i32,
}

#[derive(Serialize)]
struct CountPayload {
    affected: u64,
}

pub async fn lock_items(
    State(state): State<AppState>,
    Json(body): Json<LockItemsBody>,
) -> Result<Response, AppError> {
    let report = cart_locks::lock_items(&state, &body.session_key, body.items).await?;
    let message = if report.success {
        "Items locked"
    } else {
        "No items could be locked"
    };
    Ok(success(report, message).into_response())
}

pub async fn list_locks(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
) -> Result<Response, AppError> {
    let locks = cart_locks::list_locks(&state, &session_key).await?;
    Ok(success(locks, "Active locks").into_response())
}

pub async fn release_locks(
    State(state): State<AppState>,
    Json(body): Json<ReleaseBody>,
) -> Result<Response, AppError> {
    let affected = cart_locks::release_locks(&state, &body.session_key, body.lock_ids).await?;
    Ok(success(CountPayload { affected }, "Locks released").into_response())
}

pub async fn extend_locks(
    State(state): State<AppState>,
    Json(body): Json<ExtendBody>,
) -> Result<Response, AppError> {
    let affected = cart_locks::extend_locks(&state, &body.session_key, body.minutes).await?;
    Ok(success(CountPayload { affected }, "Locks extended").into_response())
}
