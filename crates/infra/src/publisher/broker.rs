//! Broker-backed publisher: appends envelopes to the durable log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{debug, warn};

use orderstream_core::{Order, OrderStatus};
use orderstream_events::{
    EventLog, EventPublisher, LogError, LogRecord, OrderEvent, PublishContext, PublishError,
};

use crate::config::MessagingConfig;

/// Per-attempt timeout and back-off schedule for one publish call.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub attempt_timeout: Duration,
    /// Delays between attempts; the call gives up when it runs out.
    pub backoff: ExponentialBuilder,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self::from_config(&MessagingConfig::default())
    }
}

impl PublishSettings {
    pub fn from_config(config: &MessagingConfig) -> Self {
        Self {
            attempt_timeout: config.publish_timeout,
            backoff: config.publish_backoff(),
        }
    }
}

/// Publishes order events to the durable log, keyed by `order_id`.
///
/// A call returns once the log acknowledged the record, or after the retry
/// budget is spent. Transient failures (unavailable, timed out) are retried;
/// anything else fails immediately.
#[derive(Debug, Clone)]
pub struct BrokerPublisher {
    log: Arc<dyn EventLog>,
    settings: PublishSettings,
}

impl BrokerPublisher {
    pub fn new(log: Arc<dyn EventLog>, settings: PublishSettings) -> Self {
        Self { log, settings }
    }

    async fn publish(&self, ctx: &PublishContext, event: OrderEvent) -> Result<(), PublishError> {
        event.validate()?;
        let payload = event.to_json()?;
        let record = LogRecord::new(event.partition_key(), payload);

        let mut backoff = self.settings.backoff.build();
        let mut attempts: u32 = 0;
        loop {
            if ctx.is_cancelled() {
                return Err(PublishError::Cancelled);
            }
            attempts += 1;

            let outcome = tokio::select! {
                _ = ctx.cancelled() => return Err(PublishError::Cancelled),
                outcome = tokio::time::timeout(
                    self.settings.attempt_timeout,
                    self.log.append(record.clone()),
                ) => outcome.unwrap_or(Err(LogError::Timeout)),
            };

            let error = match outcome {
                Ok(()) => {
                    debug!(
                        correlation_id = %ctx.correlation_id(),
                        order_id = %event.order_id(),
                        version = event.version(),
                        event_type = %event.event_type(),
                        attempts,
                        "order event published"
                    );
                    return Ok(());
                }
                Err(e) => e,
            };

            let delay = match backoff.next() {
                Some(delay) if error.is_transient() => delay,
                _ => {
                    return Err(PublishError::Transport {
                        attempts,
                        source: error,
                    });
                }
            };
            warn!(
                correlation_id = %ctx.correlation_id(),
                order_id = %event.order_id(),
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "publish attempt failed, retrying"
            );

            tokio::select! {
                _ = ctx.cancelled() => return Err(PublishError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[async_trait]
impl EventPublisher for BrokerPublisher {
    async fn publish_created(&self, ctx: &PublishContext, order: &Order) -> Result<(), PublishError> {
        self.publish(ctx, OrderEvent::created(order)).await
    }

    async fn publish_updated(&self, ctx: &PublishContext, order: &Order) -> Result<(), PublishError> {
        self.publish(ctx, OrderEvent::updated(order)).await
    }

    async fn publish_status_changed(
        &self,
        ctx: &PublishContext,
        order: &Order,
        old_status: OrderStatus,
        new_status: OrderStatus,
    ) -> Result<(), PublishError> {
        let event = OrderEvent::status_changed(order, old_status, new_status)?;
        self.publish(ctx, event).await
    }
}
