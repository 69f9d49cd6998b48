use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, set_security_headers};
use crate::handlers::{availability, carts, health_check, orders, reservations};
use crate::AppState;

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/orders", post(orders::create_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/complete", post(orders::complete_order))
        .route("/orders/:id/void", post(orders::void_order))
        .route("/orders/:id/payments", post(orders::record_payment))
        .route("/orders/:id/fiscal-audit", get(orders::get_fiscal_audit))
        .route("/fiscal/:tenant_id", get(orders::get_fiscal_counter))
        .route(
            "/reservations/:id/cancel",
            post(reservations::cancel_reservation),
        )
        .route("/carts/:session_key/locks", get(carts::list_locks))
        .route("/carts/lock", post(carts::lock_items))
        .route("/carts/release", post(carts::release_locks))
        .route("/carts/extend", post(carts::extend_locks))
        .route("/availability/seats/:id", get(availability::get_seat))
        .route("/availability/zones/:id", get(availability::get_zone))
        .route("/availability/events/:id", get(availability::get_event))
        .with_state(state)
        .layer(middleware::from_fn(set_security_headers))
        .layer(create_cors_layer())
        .layer(TraceLayer::new_for_http())
}
