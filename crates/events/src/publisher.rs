//! Publish contract for order events.
//!
//! ## Contract
//!
//! Three operations, one per event type. Each takes the committed order
//! snapshot and a cancellable [`PublishContext`] and returns an outcome.
//!
//! **The outcome is advisory.** Callers must log and discard an error, never
//! propagate it: a publish runs after the order write has already committed,
//! so its failure cannot undo or fail that write.
//!
//! ## Implementations
//!
//! - a broker-backed publisher that appends to the durable log
//!   (`orderstream-infra`), keyed by `order_id`, at-least-once, with bounded
//!   retries and a per-attempt timeout;
//! - [`NoopPublisher`](crate::NoopPublisher), which performs no IO and always
//!   succeeds.
//!
//! The choice is made once at startup. Both must be safe for unsynchronized
//! concurrent use (`Send + Sync`, `&self` methods).

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use orderstream_core::{Order, OrderStatus};

use crate::envelope::EnvelopeError;
use crate::log::LogError;

/// Per-operation context handed to every publish call.
///
/// Carries the correlation id used to tie publish failures back to the
/// originating order operation, and a cancellation token.
#[derive(Debug, Clone)]
pub struct PublishContext {
    correlation_id: Uuid,
    cancel: CancellationToken,
}

impl PublishContext {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            correlation_id: Uuid::now_v7(),
            cancel,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the operation has been cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

impl Default for PublishContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    /// The envelope could not be built or serialized; the event is lost.
    #[error("malformed event: {0}")]
    Malformed(#[from] EnvelopeError),

    /// The durable log did not accept the record within the retry budget.
    #[error("publish failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: LogError,
    },

    /// The operation context was cancelled before the record was accepted.
    #[error("publish cancelled")]
    Cancelled,
}

impl PublishError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, PublishError::Malformed(_))
    }
}

/// Emits order events to the outside world.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_created(&self, ctx: &PublishContext, order: &Order) -> Result<(), PublishError>;

    async fn publish_updated(&self, ctx: &PublishContext, order: &Order) -> Result<(), PublishError>;

    async fn publish_status_changed(
        &self,
        ctx: &PublishContext,
        order: &Order,
        old_status: OrderStatus,
        new_status: OrderStatus,
    ) -> Result<(), PublishError>;
}
