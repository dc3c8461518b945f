//! Redelivery tolerance for consumers that keep derived state.
//!
//! The log is at-least-once and publishers may retry, so a consumer can see
//! the same version twice or an older version after a newer one. Keeping the
//! highest version seen per order and ignoring anything at or below it makes
//! the derived state converge to the newest write.

use std::collections::HashMap;

use orderstream_core::{OrderId, OrderStatus};

use crate::envelope::OrderEvent;

/// Outcome of offering a version to a [`VersionWatermark`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Newer than anything seen for the order; apply it.
    Fresh,
    /// At or below the watermark; ignore it.
    Stale { watermark: u64 },
}

/// Highest version observed per order.
#[derive(Debug, Default, Clone)]
pub struct VersionWatermark {
    highest: HashMap<OrderId, u64>,
}

impl VersionWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `version` for `order_id` if it advances the watermark.
    pub fn observe(&mut self, order_id: &OrderId, version: u64) -> Observation {
        match self.highest.get_mut(order_id) {
            Some(current) if version <= *current => Observation::Stale { watermark: *current },
            Some(current) => {
                *current = version;
                Observation::Fresh
            }
            None => {
                self.highest.insert(order_id.clone(), version);
                Observation::Fresh
            }
        }
    }

    pub fn highest(&self, order_id: &OrderId) -> Option<u64> {
        self.highest.get(order_id).copied()
    }

    pub fn len(&self) -> usize {
        self.highest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.highest.is_empty()
    }
}

/// Latest known state per order, built from the event stream.
///
/// Disposable read model: it can be dropped and rebuilt from a live stream at
/// any time.
#[derive(Debug, Default, Clone)]
pub struct LatestOrderView {
    watermark: VersionWatermark,
    orders: HashMap<OrderId, OrderEvent>,
}

impl LatestOrderView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one envelope, ignoring it if its version is not newer.
    pub fn apply(&mut self, event: &OrderEvent) -> Observation {
        let observation = self.watermark.observe(event.order_id(), event.version());
        if observation == Observation::Fresh {
            self.orders.insert(event.order_id().clone(), event.clone());
        }
        observation
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&OrderEvent> {
        self.orders.get(order_id)
    }

    pub fn status(&self, order_id: &OrderId) -> Option<OrderStatus> {
        self.get(order_id).map(OrderEvent::effective_status)
    }

    pub fn version(&self, order_id: &OrderId) -> Option<u64> {
        self.watermark.highest(order_id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderstream_core::{CustomerId, Order};

    fn order_id() -> OrderId {
        OrderId::parse("order-7").unwrap()
    }

    fn snapshot(status: OrderStatus, version: u64) -> Order {
        Order::new(order_id(), CustomerId::parse("c").unwrap(), status, 20.0, version)
    }

    #[test]
    fn watermark_rejects_duplicates_and_regressions() {
        let mut wm = VersionWatermark::new();
        let id = order_id();

        assert_eq!(wm.observe(&id, 1), Observation::Fresh);
        assert_eq!(wm.observe(&id, 3), Observation::Fresh);
        assert_eq!(wm.observe(&id, 3), Observation::Stale { watermark: 3 });
        assert_eq!(wm.observe(&id, 2), Observation::Stale { watermark: 3 });
        assert_eq!(wm.highest(&id), Some(3));
    }

    #[test]
    fn watermarks_are_per_order() {
        let mut wm = VersionWatermark::new();
        let a = OrderId::parse("a").unwrap();
        let b = OrderId::parse("b").unwrap();

        assert_eq!(wm.observe(&a, 5), Observation::Fresh);
        assert_eq!(wm.observe(&b, 1), Observation::Fresh);
        assert_eq!(wm.len(), 2);
    }

    #[test]
    fn out_of_order_redelivery_converges_to_highest_version() {
        let v2 = OrderEvent::status_changed(
            &snapshot(OrderStatus::Confirmed, 2),
            OrderStatus::Pending,
            OrderStatus::Confirmed,
        )
        .unwrap();
        let v3 = OrderEvent::status_changed(
            &snapshot(OrderStatus::Shipped, 3),
            OrderStatus::Confirmed,
            OrderStatus::Shipped,
        )
        .unwrap();

        let mut view = LatestOrderView::new();
        assert_eq!(view.apply(&v3), Observation::Fresh);
        assert_eq!(view.apply(&v2), Observation::Stale { watermark: 3 });
        assert_eq!(view.apply(&v3), Observation::Stale { watermark: 3 });

        assert_eq!(view.version(&order_id()), Some(3));
        assert_eq!(view.status(&order_id()), Some(OrderStatus::Shipped));
        assert_eq!(view.get(&order_id()), Some(&v3));
    }
}
