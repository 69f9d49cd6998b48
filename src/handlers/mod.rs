use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::utils::response::success;

pub mod availability;
pub mod carts;
pub mod orders;
pub mod reservations;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "taquilla-api",
    };

    success(payload, "Health check successful").into_response()
}
