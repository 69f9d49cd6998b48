use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::services::reservations;
use crate::utils::error::AppError;
use crate::utils::response::success;
use crate::AppState;

/// Cancels a payment-plan hold synchronously; a seat-backed hold releases
/// its seat in the same call.
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let reservation = reservations::cancel(&state, reservation_id).await?;
    Ok(success(reservation, "Reservation cancelled").into_response())
}
