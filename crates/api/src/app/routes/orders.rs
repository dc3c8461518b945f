//! Order command endpoints.
//!
//! Each write commits through the order service, which publishes the matching
//! event afterwards. Messaging problems never change the response.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use uuid::Uuid;

use orderstream_core::{CustomerId, OrderId, OrderStatus};
use orderstream_events::PublishContext;
use orderstream_infra::{NewOrder, OrderUpdate};

use crate::app::dto::{self, ChangeStatusRequest, CreateOrderRequest, UpdateOrderRequest};
use crate::app::errors::{json_error, store_error_to_response};
use crate::app::services::AppServices;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

fn publish_context(headers: &HeaderMap) -> PublishContext {
    let ctx = PublishContext::new();
    match headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
    {
        Some(correlation_id) => ctx.with_correlation_id(correlation_id),
        None => ctx,
    }
}

fn parse_order_id(raw: String) -> Result<OrderId, axum::response::Response> {
    OrderId::parse(raw).map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}

/// POST /orders
pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Json(body): Json<CreateOrderRequest>,
) -> axum::response::Response {
    let customer_id = match CustomerId::parse(body.customer_id) {
        Ok(id) => id,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()),
    };
    let mut new_order = NewOrder::new(customer_id, body.total);
    if let Some(raw) = body.id {
        match parse_order_id(raw) {
            Ok(id) => new_order = new_order.with_id(id),
            Err(resp) => return resp,
        }
    }

    match services.orders.create(&publish_context(&headers), new_order).await {
        Ok(order) => (StatusCode::CREATED, Json(order)).into_response(),
        Err(e) => store_error_to_response(e),
    }
}

/// GET /orders/:id
pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_order_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.orders.get(&id).await {
        Ok(Some(order)) => Json(order).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", "order not found"),
        Err(e) => store_error_to_response(e),
    }
}

/// PUT /orders/:id
pub async fn update_order(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateOrderRequest>,
) -> axum::response::Response {
    let id = match parse_order_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = services
        .orders
        .update(
            &publish_context(&headers),
            &id,
            OrderUpdate { total: body.total },
            dto::expected_version(body.expected_version),
        )
        .await;

    match result {
        Ok(order) => Json(order).into_response(),
        Err(e) => store_error_to_response(e),
    }
}

/// POST /orders/:id/status
pub async fn change_status(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ChangeStatusRequest>,
) -> axum::response::Response {
    let id = match parse_order_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let status: OrderStatus = match body.status.parse() {
        Ok(status) => status,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_status", format!("{e}")),
    };

    let result = services
        .orders
        .change_status(
            &publish_context(&headers),
            &id,
            status,
            dto::expected_version(body.expected_version),
        )
        .await;

    match result {
        Ok(order) => Json(order).into_response(),
        Err(e) => store_error_to_response(e),
    }
}
