//! Order operations with failure-isolated event publication.
//!
//! ## Execution flow
//!
//! ```text
//! operation
//!   ↓
//! 1. Commit through the order store (validation, optimistic concurrency)
//!   ↓
//! 2. Hand the committed snapshot to its publish lane (never waits)
//!   ↓
//! 3. Return the store outcome
//!
//! publish lane (background)
//!   ↓
//! publish in hand-off order, log and count failures
//! ```
//!
//! A store failure returns immediately and nothing is published. A publish
//! failure never reaches the caller: it is logged with enough context to
//! correlate (correlation id, order id, version, event type), counted, and
//! dropped. Consumers that need every transition must reconcile against the
//! store.
//!
//! The commit and the hand-off happen under the order's lane lock, so two
//! writes to the same order are produced in commit order even when callers
//! race.

mod dispatch;

use std::sync::Arc;

use orderstream_core::{ExpectedVersion, Order, OrderId, OrderStatus};
use orderstream_events::{EventPublisher, PublishContext};

use crate::order_store::{NewOrder, OrderStore, OrderUpdate, StoreError};

pub use dispatch::DispatchSettings;

use dispatch::{Change, Dispatcher, Notification};

pub struct OrderService<S> {
    store: S,
    dispatcher: Dispatcher,
}

impl<S> core::fmt::Debug for OrderService<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OrderService")
            .field("dropped_notifications", &self.dropped_notifications())
            .finish_non_exhaustive()
    }
}

impl<S> OrderService<S> {
    /// Must be called within a Tokio runtime (spawns the publish lanes).
    pub fn new(store: S, publisher: Arc<dyn EventPublisher>) -> Self {
        Self::with_settings(store, publisher, DispatchSettings::default())
    }

    pub fn with_settings(store: S, publisher: Arc<dyn EventPublisher>, settings: DispatchSettings) -> Self {
        Self {
            store,
            dispatcher: Dispatcher::new(publisher, settings),
        }
    }

    /// Notifications that were logged and discarded: publish failures, full
    /// lanes, and those cancelled at shutdown.
    pub fn dropped_notifications(&self) -> u64 {
        self.dispatcher.dropped()
    }

    /// Stop accepting notifications and publish what is queued, bounded by
    /// the drain timeout. Writes after this still commit; their notifications
    /// are dropped.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

impl<S: OrderStore> OrderService<S> {
    pub async fn create(&self, ctx: &PublishContext, new_order: NewOrder) -> Result<Order, StoreError> {
        let lane = self.dispatcher.lane(new_order.id.as_str()).await;
        let order = self.store.insert(new_order).await?;
        lane.hand_off(Notification::new(ctx, &order, Change::Created));
        Ok(order)
    }

    pub async fn update(
        &self,
        ctx: &PublishContext,
        id: &OrderId,
        update: OrderUpdate,
        expected: ExpectedVersion,
    ) -> Result<Order, StoreError> {
        let lane = self.dispatcher.lane(id.as_str()).await;
        let order = self.store.update(id, update, expected).await?;
        lane.hand_off(Notification::new(ctx, &order, Change::Updated));
        Ok(order)
    }

    pub async fn change_status(
        &self,
        ctx: &PublishContext,
        id: &OrderId,
        status: OrderStatus,
        expected: ExpectedVersion,
    ) -> Result<Order, StoreError> {
        let lane = self.dispatcher.lane(id.as_str()).await;
        let change = self.store.set_status(id, status, expected).await?;
        let transition = Change::StatusChanged {
            old: change.old_status,
            new: change.order.status(),
        };
        lane.hand_off(Notification::new(ctx, &change.order, transition));
        Ok(change.order)
    }

    pub async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        self.store.get(id).await
    }
}
