//! Order event envelope (the wire record carried by the durable log).
//!
//! One envelope is built per committed change to an order. It is immutable
//! once constructed and is never stored locally: after hand-off the durable
//! log is the only store of record.
//!
//! The wire form is JSON so the raw stream stays readable with plain
//! `XRANGE`/`XREAD` during incident response. All event types share one
//! channel and are discriminated by `event_type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use orderstream_core::{CustomerId, Order, OrderId, OrderStatus};

/// Discriminator of an [`OrderEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "order.created")]
    Created,
    #[serde(rename = "order.updated")]
    Updated,
    #[serde(rename = "order.status_changed")]
    StatusChanged,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "order.created",
            EventType::Updated => "order.updated",
            EventType::StatusChanged => "order.status_changed",
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope encoding failed: {0}")]
    Encode(String),

    #[error("envelope decoding failed: {0}")]
    Decode(String),

    #[error("invalid envelope: {0}")]
    Invalid(String),
}

/// Envelope for one order domain event.
///
/// Notes:
/// - `version` mirrors the order's optimistic-concurrency version at the time
///   of the write, so it strictly increases per `order_id`.
/// - `old_status`/`new_status` are only present for `order.status_changed`
///   and never equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    event_type: EventType,
    order_id: OrderId,
    customer_id: CustomerId,
    status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    old_status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_status: Option<OrderStatus>,
    total: f64,
    version: u64,
    occurred_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn created(order: &Order) -> Self {
        Self::from_order(EventType::Created, order, None, None)
    }

    pub fn updated(order: &Order) -> Self {
        Self::from_order(EventType::Updated, order, None, None)
    }

    pub fn status_changed(
        order: &Order,
        old_status: OrderStatus,
        new_status: OrderStatus,
    ) -> Result<Self, EnvelopeError> {
        if old_status == new_status {
            return Err(EnvelopeError::Invalid(format!(
                "status change for order {} does not change anything ({old_status} -> {new_status})",
                order.id()
            )));
        }
        Ok(Self::from_order(
            EventType::StatusChanged,
            order,
            Some(old_status),
            Some(new_status),
        ))
    }

    fn from_order(
        event_type: EventType,
        order: &Order,
        old_status: Option<OrderStatus>,
        new_status: Option<OrderStatus>,
    ) -> Self {
        Self {
            event_type,
            order_id: order.id().clone(),
            customer_id: order.customer_id().clone(),
            status: order.status(),
            old_status,
            new_status,
            total: order.total(),
            version: order.version(),
            occurred_at: Utc::now(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn old_status(&self) -> Option<OrderStatus> {
        self.old_status
    }

    pub fn new_status(&self) -> Option<OrderStatus> {
        self.new_status
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Status used for subscription filtering: `new_status` for status
    /// changes, `status` otherwise.
    pub fn effective_status(&self) -> OrderStatus {
        match (self.event_type, self.new_status) {
            (EventType::StatusChanged, Some(new_status)) => new_status,
            _ => self.status,
        }
    }

    /// Ordering key on the durable log.
    pub fn partition_key(&self) -> &str {
        self.order_id.as_str()
    }

    /// Check the structural invariants of a (possibly decoded) envelope.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.version == 0 {
            return Err(EnvelopeError::Invalid(format!(
                "order {} has version 0 (versions start at 1)",
                self.order_id
            )));
        }
        if !self.total.is_finite() {
            return Err(EnvelopeError::Invalid(format!(
                "order {} has a non-finite total",
                self.order_id
            )));
        }

        match (self.event_type, self.old_status, self.new_status) {
            (EventType::StatusChanged, Some(old), Some(new)) if old != new => Ok(()),
            (EventType::StatusChanged, Some(_), Some(_)) => Err(EnvelopeError::Invalid(
                "old_status equals new_status".to_string(),
            )),
            (EventType::StatusChanged, _, _) => Err(EnvelopeError::Invalid(
                "status change without old_status/new_status".to_string(),
            )),
            (_, None, None) => Ok(()),
            (other, _, _) => Err(EnvelopeError::Invalid(format!(
                "{other} must not carry old_status/new_status"
            ))),
        }
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Decode and validate a wire envelope.
    pub fn from_json(raw: &str) -> Result<Self, EnvelopeError> {
        let event: OrderEvent =
            serde_json::from_str(raw).map_err(|e| EnvelopeError::Decode(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order(status: OrderStatus, version: u64) -> Order {
        Order::new(
            OrderId::parse("order-1").unwrap(),
            CustomerId::parse("cust-9").unwrap(),
            status,
            99.5,
            version,
        )
    }

    #[test]
    fn created_envelope_has_no_transition_fields() {
        let ev = OrderEvent::created(&order(OrderStatus::Pending, 1));
        let value: serde_json::Value = serde_json::from_str(&ev.to_json().unwrap()).unwrap();

        assert_eq!(value["event_type"], json!("order.created"));
        assert_eq!(value["order_id"], json!("order-1"));
        assert_eq!(value["customer_id"], json!("cust-9"));
        assert_eq!(value["status"], json!("pending"));
        assert_eq!(value["total"], json!(99.5));
        assert_eq!(value["version"], json!(1));
        assert!(value.get("old_status").is_none());
        assert!(value.get("new_status").is_none());
        assert!(value["occurred_at"].is_string());
    }

    #[test]
    fn status_change_requires_distinct_statuses() {
        let o = order(OrderStatus::Confirmed, 2);
        assert!(OrderEvent::status_changed(&o, OrderStatus::Confirmed, OrderStatus::Confirmed).is_err());

        let ev = OrderEvent::status_changed(&o, OrderStatus::Pending, OrderStatus::Confirmed).unwrap();
        assert_eq!(ev.event_type(), EventType::StatusChanged);
        assert_eq!(ev.old_status(), Some(OrderStatus::Pending));
        assert_eq!(ev.new_status(), Some(OrderStatus::Confirmed));
    }

    #[test]
    fn effective_status_prefers_new_status() {
        // Snapshot status is stale on purpose: filtering must follow new_status.
        let o = order(OrderStatus::Confirmed, 3);
        let ev = OrderEvent::status_changed(&o, OrderStatus::Confirmed, OrderStatus::Shipped).unwrap();
        assert_eq!(ev.effective_status(), OrderStatus::Shipped);

        let updated = OrderEvent::updated(&o);
        assert_eq!(updated.effective_status(), OrderStatus::Confirmed);
    }

    #[test]
    fn decode_rejects_inconsistent_envelopes() {
        let missing_transition = json!({
            "event_type": "order.status_changed",
            "order_id": "o", "customer_id": "c", "status": "shipped",
            "total": 1.0, "version": 2, "occurred_at": "2026-01-01T00:00:00Z"
        });
        assert!(matches!(
            OrderEvent::from_json(&missing_transition.to_string()),
            Err(EnvelopeError::Invalid(_))
        ));

        let stray_transition = json!({
            "event_type": "order.updated",
            "order_id": "o", "customer_id": "c", "status": "shipped",
            "old_status": "pending", "new_status": "shipped",
            "total": 1.0, "version": 2, "occurred_at": "2026-01-01T00:00:00Z"
        });
        assert!(OrderEvent::from_json(&stray_transition.to_string()).is_err());

        let empty_id = json!({
            "event_type": "order.created",
            "order_id": "", "customer_id": "c", "status": "pending",
            "total": 1.0, "version": 1, "occurred_at": "2026-01-01T00:00:00Z"
        });
        assert!(matches!(
            OrderEvent::from_json(&empty_id.to_string()),
            Err(EnvelopeError::Decode(_))
        ));

        assert!(matches!(OrderEvent::from_json("not json"), Err(EnvelopeError::Decode(_))));
    }

    #[test]
    fn decode_accepts_what_encode_produces() {
        let o = order(OrderStatus::Shipped, 3);
        let ev = OrderEvent::status_changed(&o, OrderStatus::Confirmed, OrderStatus::Shipped).unwrap();
        let decoded = OrderEvent::from_json(&ev.to_json().unwrap()).unwrap();
        assert_eq!(decoded, ev);
        assert_eq!(decoded.partition_key(), "order-1");
    }
}
