//! Per-subscription delivery channel with drop-oldest overflow.
//!
//! Each subscription owns a single-receiver `tokio::sync::broadcast` channel.
//! The session task sends without ever waiting; once the client is
//! `capacity` items behind, the oldest unread item is overwritten. The client
//! learns about overwritten items through `RecvError::Lagged(n)`, which is
//! handed out as [`Delivery::Gap`] before the next envelope.
//!
//! The channel rounds its capacity up to the next power of two.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;

use orderstream_events::OrderEvent;

/// One item handed to a streaming client.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(OrderEvent),
    /// `dropped` envelopes were discarded before the next delivery.
    Gap { dropped: u64 },
    /// The stream ended; nothing follows.
    Terminated { reason: String },
}

/// Sending half, owned by the session.
#[derive(Debug)]
pub(crate) struct DeliveryBuffer {
    tx: broadcast::Sender<Delivery>,
    capacity: usize,
    gaps: AtomicU64,
    terminated: AtomicBool,
    consumed: Arc<Notify>,
}

/// Receiving half, owned by the client handle.
#[derive(Debug)]
pub(crate) struct DeliveryReceiver {
    rx: Option<broadcast::Receiver<Delivery>>,
    consumed: Arc<Notify>,
}

impl DeliveryBuffer {
    pub(crate) fn new(capacity: usize) -> (Self, DeliveryReceiver) {
        let capacity = capacity.max(1).next_power_of_two();
        let (tx, rx) = broadcast::channel(capacity);
        let consumed = Arc::new(Notify::new());
        let buffer = Self {
            tx,
            capacity,
            gaps: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
            consumed: consumed.clone(),
        };
        let receiver = DeliveryReceiver {
            rx: Some(rx),
            consumed,
        };
        (buffer, receiver)
    }

    /// Envelopes overwritten before the client could take them.
    pub(crate) fn gaps(&self) -> u64 {
        self.gaps.load(Ordering::Relaxed)
    }

    /// Items the client has not taken yet.
    pub(crate) fn len(&self) -> usize {
        self.tx.len()
    }

    fn send(&self, delivery: Delivery) -> bool {
        let overwrites = self.tx.len() >= self.capacity;
        if self.tx.send(delivery).is_err() {
            // client gone
            return false;
        }
        if overwrites {
            self.gaps.fetch_add(1, Ordering::Relaxed);
        }
        overwrites
    }

    /// Queue an envelope. Returns `true` if an older one was overwritten.
    pub(crate) fn push(&self, event: OrderEvent) -> bool {
        if self.terminated.load(Ordering::Acquire) {
            return false;
        }
        self.send(Delivery::Event(event))
    }

    /// Queue the terminal item; queued envelopes are still delivered first.
    pub(crate) fn terminate(&self, reason: impl Into<String>) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.send(Delivery::Terminated {
            reason: reason.into(),
        });
    }

    /// Resolve once the client took everything, or went away.
    pub(crate) async fn drained(&self) {
        while self.tx.len() > 0 && self.tx.receiver_count() > 0 {
            self.consumed.notified().await;
        }
    }
}

impl DeliveryReceiver {
    /// Next delivery; `None` once the terminal item was taken.
    pub(crate) async fn recv(&mut self) -> Option<Delivery> {
        let rx = self.rx.as_mut()?;
        let delivery = match rx.recv().await {
            Ok(delivery) => delivery,
            Err(RecvError::Lagged(dropped)) => Delivery::Gap { dropped },
            Err(RecvError::Closed) => {
                self.rx = None;
                return None;
            }
        };
        if matches!(delivery, Delivery::Terminated { .. }) {
            self.rx = None;
        }
        self.consumed.notify_one();
        Some(delivery)
    }
}

impl Drop for DeliveryReceiver {
    fn drop(&mut self) {
        // Release the channel before waking a drain waiter.
        self.rx.take();
        self.consumed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderstream_core::{CustomerId, Order, OrderId, OrderStatus};

    fn event(version: u64) -> OrderEvent {
        OrderEvent::updated(&Order::new(
            OrderId::parse("order-1").unwrap(),
            CustomerId::parse("customer-1").unwrap(),
            OrderStatus::Pending,
            1.0,
            version,
        ))
    }

    fn version(delivery: Option<Delivery>) -> u64 {
        match delivery {
            Some(Delivery::Event(e)) => e.version(),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_reports_gap() {
        let (buffer, mut rx) = DeliveryBuffer::new(2);
        assert!(!buffer.push(event(1)));
        assert!(!buffer.push(event(2)));
        assert!(buffer.push(event(3)));
        assert!(buffer.push(event(4)));
        assert_eq!(buffer.gaps(), 2);
        assert_eq!(buffer.len(), 2);

        assert_eq!(rx.recv().await, Some(Delivery::Gap { dropped: 2 }));
        assert_eq!(version(rx.recv().await), 3);
        assert_eq!(version(rx.recv().await), 4);
        assert_eq!(buffer.len(), 0);
    }

    #[tokio::test]
    async fn capacity_rounds_up_to_power_of_two() {
        let (buffer, _rx) = DeliveryBuffer::new(3);
        for v in 1..=4 {
            assert!(!buffer.push(event(v)));
        }
        assert!(buffer.push(event(5)));
        assert_eq!(buffer.len(), 4);
    }

    #[tokio::test]
    async fn termination_follows_queued_events() {
        let (buffer, mut rx) = DeliveryBuffer::new(4);
        buffer.push(event(1));
        buffer.terminate("shutdown");
        assert!(!buffer.push(event(2)));

        assert_eq!(version(rx.recv().await), 1);
        assert_eq!(
            rx.recv().await,
            Some(Delivery::Terminated { reason: "shutdown".to_string() })
        );
        assert_eq!(rx.recv().await, None);
        buffer.drained().await;
    }

    #[tokio::test]
    async fn drained_waits_for_the_client() {
        let (buffer, mut rx) = DeliveryBuffer::new(4);
        let buffer = Arc::new(buffer);
        buffer.push(event(1));
        buffer.terminate("closed");

        let waiter = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.drained().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        while rx.recv().await.is_some() {}
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let (buffer, mut rx) = DeliveryBuffer::new(1);
        let reader = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;
        buffer.push(event(7));
        assert_eq!(version(reader.await.unwrap()), 7);
    }

    #[tokio::test]
    async fn dropped_receiver_releases_the_channel() {
        let (buffer, rx) = DeliveryBuffer::new(1);
        buffer.push(event(1));
        drop(rx);
        assert_eq!(buffer.len(), 0);
        assert!(!buffer.push(event(2)));
        buffer.drained().await;
    }
}
