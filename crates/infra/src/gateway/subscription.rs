//! Live streaming subscription: state machine and client handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use orderstream_events::StatusFilter;

use super::buffer::{Delivery, DeliveryBuffer, DeliveryReceiver};

/// Lifecycle of one subscription. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SubscriptionState {
    Opening = 0,
    Active = 1,
    Draining = 2,
    Closed = 3,
}

impl SubscriptionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SubscriptionState::Opening,
            1 => SubscriptionState::Active,
            2 => SubscriptionState::Draining,
            _ => SubscriptionState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Opening => "opening",
            SubscriptionState::Active => "active",
            SubscriptionState::Draining => "draining",
            SubscriptionState::Closed => "closed",
        }
    }
}

impl core::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(SubscriptionState::Opening as u8))
    }

    pub(crate) fn get(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if it is later than the current state.
    pub(crate) fn advance(&self, next: SubscriptionState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (next as u8 > current).then_some(next as u8)
            })
            .is_ok()
    }
}

/// State shared between the session task and the client handle.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) id: Uuid,
    pub(crate) group: String,
    pub(crate) filter: StatusFilter,
    pub(crate) buffer: DeliveryBuffer,
    pub(crate) state: StateCell,
    pub(crate) malformed: AtomicU64,
    pub(crate) cancel: CancellationToken,
}

impl Session {
    pub(crate) fn new(
        id: Uuid,
        group: String,
        filter: StatusFilter,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, DeliveryReceiver) {
        let (buffer, receiver) = DeliveryBuffer::new(capacity);
        let session = Self {
            id,
            group,
            filter,
            buffer,
            state: StateCell::new(),
            malformed: AtomicU64::new(0),
            cancel,
        };
        (session, receiver)
    }
}

/// Client side of a live subscription.
///
/// Dropping the handle cancels the subscription and releases its buffer and
/// consumer group.
#[derive(Debug)]
pub struct SubscriptionHandle {
    session: Arc<Session>,
    receiver: DeliveryReceiver,
}

impl SubscriptionHandle {
    pub(crate) fn new(session: Arc<Session>, receiver: DeliveryReceiver) -> Self {
        Self { session, receiver }
    }

    pub fn id(&self) -> Uuid {
        self.session.id
    }

    pub fn state(&self) -> SubscriptionState {
        self.session.state.get()
    }

    /// Envelopes dropped for this subscription because its buffer was full.
    pub fn gaps(&self) -> u64 {
        self.session.buffer.gaps()
    }

    /// Records that could not be decoded and were skipped.
    pub fn malformed(&self) -> u64 {
        self.session.malformed.load(Ordering::Relaxed)
    }

    /// Envelopes waiting to be taken by [`recv`](Self::recv).
    pub fn pending(&self) -> usize {
        self.session.buffer.len()
    }

    /// Next delivery. Returns `None` after [`Delivery::Terminated`].
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.session.cancel.cancel();
    }
}
