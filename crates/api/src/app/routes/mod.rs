use axum::{
    Router,
    routing::{get, post},
};

pub mod orders;
pub mod stream;
pub mod system;

/// Router for all order endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/orders", post(orders::create_order))
        .route("/orders/stream", get(stream::stream_orders))
        .route("/orders/:id", get(orders::get_order).put(orders::update_order))
        .route("/orders/:id/status", post(orders::change_status))
}
