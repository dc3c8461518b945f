//! Order snapshot: the minimal entity data the messaging layer needs.
//!
//! The transactional store owns the full order record. What lives here is the
//! committed view that gets copied into event envelopes: identity, owner,
//! status, total and the optimistic-concurrency version of the write.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{CustomerId, OrderId};

/// Order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Shipped)
                | (Confirmed, Cancelled)
                | (Shipped, Delivered)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown order status '{other}' (expected one of: pending, confirmed, shipped, delivered, cancelled)"
            ))),
        }
    }
}

/// Committed snapshot of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_id: CustomerId,
    status: OrderStatus,
    total: f64,
    /// Optimistic-concurrency version of the write that produced this snapshot.
    version: u64,
}

impl Order {
    pub fn new(
        id: OrderId,
        customer_id: CustomerId,
        status: OrderStatus,
        total: f64,
        version: u64,
    ) -> Self {
        Self {
            id,
            customer_id,
            status,
            total,
            version,
        }
    }

    pub fn id(&self) -> &OrderId {
        &self.id
    }

    pub fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Next snapshot after a committed write, with the version bumped by one.
    pub fn next_revision(&self, status: OrderStatus, total: f64) -> Self {
        Self {
            id: self.id.clone(),
            customer_id: self.customer_id.clone(),
            status,
            total,
            version: self.version + 1,
        }
    }
}
