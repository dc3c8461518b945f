//! Background publication lanes.
//!
//! A committed snapshot is handed to one of a fixed set of worker tasks,
//! chosen by hashing the order id, so each order has exactly one lane and its
//! notifications are published in hand-off order. The hand-off never waits:
//! when a lane is full the notification is dropped and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use orderstream_core::{Order, OrderStatus};
use orderstream_events::{EventPublisher, EventType, PublishContext, PublishError};

use crate::config::MessagingConfig;
use crate::event_log::partition_for;

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Worker tasks; each order always maps to the same one.
    pub lanes: u32,
    /// Pending notifications per lane.
    pub queue_capacity: usize,
    /// How long shutdown waits for queued notifications before cancelling them.
    pub drain_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&MessagingConfig::default())
    }
}

impl DispatchSettings {
    pub fn from_config(config: &MessagingConfig) -> Self {
        Self {
            lanes: config.publish_lanes,
            queue_capacity: config.publish_queue,
            drain_timeout: config.drain_grace,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Change {
    Created,
    Updated,
    StatusChanged { old: OrderStatus, new: OrderStatus },
}

impl Change {
    fn event_type(&self) -> EventType {
        match self {
            Change::Created => EventType::Created,
            Change::Updated => EventType::Updated,
            Change::StatusChanged { .. } => EventType::StatusChanged,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Notification {
    ctx: PublishContext,
    order: Order,
    change: Change,
}

impl Notification {
    pub(crate) fn new(ctx: &PublishContext, order: &Order, change: Change) -> Self {
        Self {
            ctx: ctx.clone(),
            order: order.clone(),
            change,
        }
    }

    async fn publish(&self, publisher: &dyn EventPublisher) -> Result<(), PublishError> {
        match self.change {
            Change::Created => publisher.publish_created(&self.ctx, &self.order).await,
            Change::Updated => publisher.publish_updated(&self.ctx, &self.order).await,
            Change::StatusChanged { old, new } => {
                publisher
                    .publish_status_changed(&self.ctx, &self.order, old, new)
                    .await
            }
        }
    }
}

#[derive(Debug, Error)]
enum DropReason {
    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("publish lane full ({capacity} pending)")]
    LaneFull { capacity: usize },

    #[error("publisher stopped")]
    Stopped,
}

/// Logs every outcome and counts the dropped ones.
#[derive(Debug, Default)]
struct Outcomes {
    dropped: AtomicU64,
}

impl Outcomes {
    fn record(&self, notification: &Notification, outcome: Result<(), DropReason>) {
        let Notification { ctx, order, change } = notification;
        match outcome {
            Ok(()) => debug!(
                correlation_id = %ctx.correlation_id(),
                order_id = %order.id(),
                version = order.version(),
                event_type = %change.event_type(),
                "order notification sent"
            ),
            Err(error) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    order_id = %order.id(),
                    version = order.version(),
                    event_type = %change.event_type(),
                    error = %error,
                    "order notification dropped"
                );
            }
        }
    }
}

type Lane = Mutex<Option<mpsc::Sender<Notification>>>;

pub(crate) struct Dispatcher {
    lanes: Vec<Lane>,
    settings: DispatchSettings,
    outcomes: Arc<Outcomes>,
    workers: Mutex<JoinSet<()>>,
    stop: CancellationToken,
}

/// Exclusive access to one lane. Holding it across a commit keeps the
/// hand-off order of that lane equal to its commit order.
pub(crate) struct LaneGuard<'a> {
    sender: MutexGuard<'a, Option<mpsc::Sender<Notification>>>,
    outcomes: &'a Outcomes,
    capacity: usize,
}

impl LaneGuard<'_> {
    pub(crate) fn hand_off(self, notification: Notification) {
        let Some(sender) = (*self.sender).as_ref() else {
            self.outcomes.record(&notification, Err(DropReason::Stopped));
            return;
        };
        match sender.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(notification)) => self.outcomes.record(
                &notification,
                Err(DropReason::LaneFull {
                    capacity: self.capacity,
                }),
            ),
            Err(mpsc::error::TrySendError::Closed(notification)) => {
                self.outcomes.record(&notification, Err(DropReason::Stopped))
            }
        }
    }
}

impl Dispatcher {
    /// Spawns the lane workers; must be called within a Tokio runtime.
    pub(crate) fn new(publisher: Arc<dyn EventPublisher>, settings: DispatchSettings) -> Self {
        let outcomes = Arc::new(Outcomes::default());
        let stop = CancellationToken::new();
        let mut workers = JoinSet::new();
        let lanes = (0..settings.lanes.max(1))
            .map(|_| {
                let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
                workers.spawn(run_lane(publisher.clone(), outcomes.clone(), stop.clone(), rx));
                Mutex::new(Some(tx))
            })
            .collect();

        Self {
            lanes,
            settings,
            outcomes,
            workers: Mutex::new(workers),
            stop,
        }
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.outcomes.dropped.load(Ordering::Relaxed)
    }

    pub(crate) async fn lane(&self, order_id: &str) -> LaneGuard<'_> {
        let count = u32::try_from(self.lanes.len()).unwrap_or(u32::MAX);
        let index = partition_for(order_id, count) as usize;
        LaneGuard {
            sender: self.lanes[index].lock().await,
            outcomes: &self.outcomes,
            capacity: self.settings.queue_capacity,
        }
    }

    /// Close every lane, then wait (bounded) for queued notifications.
    /// Whatever is still pending afterwards is cancelled and counted.
    pub(crate) async fn shutdown(&self) {
        for lane in &self.lanes {
            lane.lock().await.take();
        }

        let mut workers = self.workers.lock().await;
        let drained = tokio::time::timeout(self.settings.drain_timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                dropped = self.dropped(),
                "publish lanes not drained in time, cancelling pending notifications"
            );
            self.stop.cancel();
            while workers.join_next().await.is_some() {}
        }
    }
}

async fn run_lane(
    publisher: Arc<dyn EventPublisher>,
    outcomes: Arc<Outcomes>,
    stop: CancellationToken,
    mut rx: mpsc::Receiver<Notification>,
) {
    while let Some(notification) = rx.recv().await {
        let outcome = if stop.is_cancelled() {
            Err(PublishError::Cancelled)
        } else {
            tokio::select! {
                _ = stop.cancelled() => Err(PublishError::Cancelled),
                outcome = notification.publish(publisher.as_ref()) => outcome,
            }
        };
        outcomes.record(&notification, outcome.map_err(DropReason::from));
    }
}
