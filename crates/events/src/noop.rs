//! Inert publisher used when no durable log is configured.

use async_trait::async_trait;

use orderstream_core::{Order, OrderStatus};

use crate::publisher::{EventPublisher, PublishContext, PublishError};

/// Publisher that performs no IO and reports success for every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl NoopPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish_created(&self, _ctx: &PublishContext, _order: &Order) -> Result<(), PublishError> {
        Ok(())
    }

    async fn publish_updated(&self, _ctx: &PublishContext, _order: &Order) -> Result<(), PublishError> {
        Ok(())
    }

    async fn publish_status_changed(
        &self,
        _ctx: &PublishContext,
        _order: &Order,
        _old_status: OrderStatus,
        _new_status: OrderStatus,
    ) -> Result<(), PublishError> {
        Ok(())
    }
}
