//! Live order stream over Server-Sent Events.
//!
//! `GET /orders/stream?status=shipped,delivered` opens a gateway subscription
//! and forwards its deliveries:
//!
//! - `event: order` with the wire envelope as data
//! - `event: gap` with `{"dropped":n}` after envelopes were lost to backpressure
//! - `event: terminated` with `{"reason":"..."}`, after which the stream ends
//!
//! The subscription is dropped (and its consumer group released) as soon as
//! the client goes away.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use orderstream_events::StatusFilter;
use orderstream_infra::{Delivery, SubscriptionHandle};

use crate::app::dto::StreamQuery;
use crate::app::errors::{gateway_error_to_response, json_error};
use crate::app::services::AppServices;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// SSE frames buffered between the forwarder task and the connection.
const SSE_CHANNEL_CAPACITY: usize = 16;

/// GET /orders/stream
pub async fn stream_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<StreamQuery>,
) -> axum::response::Response {
    let filter = match StatusFilter::parse(query.status.as_deref().unwrap_or_default()) {
        Ok(filter) => filter,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_filter", e.to_string()),
    };

    let handle = match services.gateway.open(filter).await {
        Ok(handle) => handle,
        Err(e) => return gateway_error_to_response(e),
    };

    let (tx, rx) = mpsc::channel::<Result<SseEvent, Infallible>>(SSE_CHANNEL_CAPACITY);
    tokio::spawn(forward(handle, tx));

    Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response()
}

/// Pump deliveries into the connection until either side ends.
async fn forward(mut handle: SubscriptionHandle, tx: mpsc::Sender<Result<SseEvent, Infallible>>) {
    let session_id = handle.id();
    loop {
        let delivery = tokio::select! {
            _ = tx.closed() => break,
            delivery = handle.recv() => delivery,
        };
        let Some(delivery) = delivery else {
            break;
        };
        let Some(frame) = to_sse(&delivery) else {
            continue;
        };
        if tx.send(Ok(frame)).await.is_err() {
            break;
        }
    }
    debug!(%session_id, gaps = handle.gaps(), "stream client detached");
}

fn to_sse(delivery: &Delivery) -> Option<SseEvent> {
    match delivery {
        Delivery::Event(event) => match event.to_json() {
            Ok(json) => Some(SseEvent::default().event("order").data(json)),
            Err(e) => {
                warn!(order_id = %event.order_id(), error = %e, "failed to encode order event");
                None
            }
        },
        Delivery::Gap { dropped } => Some(
            SseEvent::default()
                .event("gap")
                .data(serde_json::json!({ "dropped": dropped }).to_string()),
        ),
        Delivery::Terminated { reason } => Some(
            SseEvent::default()
                .event("terminated")
                .data(serde_json::json!({ "reason": reason }).to_string()),
        ),
    }
}
