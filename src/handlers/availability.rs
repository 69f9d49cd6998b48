use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::services::availability;
use crate::utils::error::AppError;
use crate::utils::response::success;
use crate::AppState;

pub async fn get_seat(
    State(state): State<AppState>,
    Path(seat_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let snapshot = availability::get_seat(&state, seat_id).await?;
    Ok(success(snapshot, "Seat availability").into_response())
}

pub async fn get_zone(
    State(state): State<AppState>,
    Path(zone_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let snapshot = availability::get_zone(&state, zone_id).await?;
    Ok(success(snapshot, "Zone availability").into_response())
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let snapshot = availability::get_event(&state, event_id).await?;
    Ok(success(snapshot, "Event availability").into_response())
}
