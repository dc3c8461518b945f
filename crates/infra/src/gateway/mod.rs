//! Streaming gateway: fans the durable log out to live subscriptions.
//!
//! ## Sessions
//!
//! Every subscription joins the log through its own consumer group
//! (`<group_prefix>-<uuid v7>`) and gets its own consume task, so a slow or
//! vanished client never holds back another one. Groups start at the current
//! end of the log; nothing is replayed.
//!
//! ```text
//! log ──(group A)──► session task A ──filter──► buffer A ──► client A
//!     └─(group B)──► session task B ──filter──► buffer B ──► client B
//! ```
//!
//! The session task never waits on a client: a full buffer drops its oldest
//! envelope and counts a gap.
//!
//! ## Lifecycle
//!
//! `Opening` → `Active` (joined) → `Draining` (client gone, shutdown or fatal
//! read error) → `Closed` (queued deliveries taken or the drain grace elapsed,
//! consumer group left). Deliveries a client has not taken by then stay in its
//! channel until the handle is dropped.

mod buffer;
mod subscription;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::sync::atomic::Ordering;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use orderstream_events::{EventLog, LogCursor, OrderEvent, StatusFilter};

use crate::config::MessagingConfig;

pub use buffer::Delivery;
pub use subscription::{SubscriptionHandle, SubscriptionState};

use subscription::Session;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub group_prefix: String,
    /// Per-subscription buffer capacity.
    pub buffer_capacity: usize,
    pub read_batch: usize,
    /// Upper bound for draining a closing session.
    pub drain_grace: Duration,
    /// Delays between consecutive transient read errors; the stream ends
    /// when they run out.
    pub read_backoff: ExponentialBuilder,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from_config(&MessagingConfig::default())
    }
}

impl GatewaySettings {
    pub fn from_config(config: &MessagingConfig) -> Self {
        Self {
            group_prefix: config.group_prefix.clone(),
            buffer_capacity: config.stream_buffer,
            read_batch: config.read_batch,
            drain_grace: config.drain_grace,
            read_backoff: config.read_backoff(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The durable log could not be joined; no stream was opened.
    #[error("stream unavailable: {0}")]
    Unavailable(String),

    #[error("gateway is shutting down")]
    ShuttingDown,
}

#[derive(Clone)]
pub struct StreamGateway {
    inner: Arc<Inner>,
}

struct Inner {
    log: Option<Arc<dyn EventLog>>,
    settings: GatewaySettings,
    sessions: Mutex<HashSet<Uuid>>,
    active: watch::Sender<usize>,
    shutdown: CancellationToken,
}

impl core::fmt::Debug for StreamGateway {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StreamGateway")
            .field("enabled", &self.inner.log.is_some())
            .field("active_sessions", &self.active_sessions())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl Inner {
    fn register(&self, id: Uuid) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(id);
            self.active.send_replace(sessions.len());
        }
    }

    fn unregister(&self, id: &Uuid) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(id);
            self.active.send_replace(sessions.len());
        }
    }
}

impl StreamGateway {
    pub fn new(log: Arc<dyn EventLog>, settings: GatewaySettings) -> Self {
        Self::build(Some(log), settings)
    }

    /// Gateway without a durable log: every open fails with `Unavailable`.
    pub fn disabled() -> Self {
        Self::build(None, GatewaySettings::default())
    }

    fn build(log: Option<Arc<dyn EventLog>>, settings: GatewaySettings) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                log,
                settings,
                sessions: Mutex::new(HashSet::new()),
                active,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Sessions that still hold a consumer group.
    pub fn active_sessions(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Open a live stream starting at the current end of the log.
    ///
    /// Fails immediately if the log cannot be joined.
    pub async fn open(&self, filter: StatusFilter) -> Result<SubscriptionHandle, GatewayError> {
        let Some(log) = self.inner.log.clone() else {
            return Err(GatewayError::Unavailable("no event log configured".to_string()));
        };
        if self.inner.shutdown.is_cancelled() {
            return Err(GatewayError::ShuttingDown);
        }

        let id = Uuid::now_v7();
        let group = format!("{}-{}", self.inner.settings.group_prefix, id);
        let (session, receiver) = Session::new(
            id,
            group.clone(),
            filter,
            self.inner.settings.buffer_capacity,
            self.inner.shutdown.child_token(),
        );
        let session = Arc::new(session);

        let cursor = match log.join(&group).await {
            Ok(cursor) => cursor,
            Err(e) => {
                session.state.advance(SubscriptionState::Closed);
                warn!(session_id = %id, group = %group, error = %e, "stream open failed");
                return Err(GatewayError::Unavailable(e.to_string()));
            }
        };

        session.state.advance(SubscriptionState::Active);
        self.inner.register(id);
        info!(session_id = %id, group = %group, filter = %session.filter, "stream session opened");

        tokio::spawn(run_session(self.inner.clone(), session.clone(), cursor));
        Ok(SubscriptionHandle::new(session, receiver))
    }

    /// Terminate every session and wait (bounded) until their groups are left.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut active = self.inner.active.subscribe();
        let wait = async {
            while *active.borrow_and_update() != 0 {
                if active.changed().await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(self.inner.settings.drain_grace * 2, wait)
            .await
            .is_err()
        {
            warn!(remaining = self.active_sessions(), "stream sessions still open after shutdown grace");
        }
    }
}

async fn run_session(inner: Arc<Inner>, session: Arc<Session>, mut cursor: Box<dyn LogCursor>) {
    let settings = &inner.settings;
    let mut backoff = settings.read_backoff.build();
    let mut failures: u32 = 0;

    let reason = loop {
        let batch = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => break close_reason(&inner),
            batch = cursor.next_batch(settings.read_batch) => batch,
        };

        match batch {
            Ok(records) => {
                if failures > 0 {
                    failures = 0;
                    backoff = settings.read_backoff.build();
                }
                for record in records {
                    match OrderEvent::from_json(&record.payload) {
                        Ok(event) => {
                            if session.filter.admits(&event) && session.buffer.push(event) {
                                debug!(session_id = %session.id, "subscription buffer full, dropped oldest");
                            }
                        }
                        Err(e) => {
                            session.malformed.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                session_id = %session.id,
                                key = %record.key,
                                error = %e,
                                "skipping malformed order event"
                            );
                        }
                    }
                }
            }
            Err(e) if e.is_transient() => {
                let Some(delay) = backoff.next() else {
                    warn!(session_id = %session.id, attempts = failures + 1, error = %e, "event log read failed, terminating stream");
                    break format!("event log read failed: {e}");
                };
                failures += 1;
                warn!(
                    session_id = %session.id,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "event log read failed, retrying"
                );
                tokio::select! {
                    _ = session.cancel.cancelled() => break close_reason(&inner),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "event log read failed, terminating stream");
                break format!("event log read failed: {e}");
            }
        }
    };

    session.state.advance(SubscriptionState::Draining);
    session.buffer.terminate(reason.clone());

    if tokio::time::timeout(settings.drain_grace, session.buffer.drained())
        .await
        .is_err()
    {
        debug!(
            session_id = %session.id,
            pending = session.buffer.len(),
            "drain grace elapsed, closing with deliveries untaken"
        );
    }

    match tokio::time::timeout(settings.drain_grace, cursor.leave()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(session_id = %session.id, group = %session.group, error = %e, "failed to leave consumer group"),
        Err(_) => warn!(session_id = %session.id, group = %session.group, "timed out leaving consumer group"),
    }

    session.state.advance(SubscriptionState::Closed);
    inner.unregister(&session.id);
    info!(
        session_id = %session.id,
        reason = %reason,
        gaps = session.buffer.gaps(),
        malformed = session.malformed.load(Ordering::Relaxed),
        "stream session closed"
    );
}

fn close_reason(inner: &Inner) -> String {
    if inner.shutdown.is_cancelled() {
        "server shutting down".to_string()
    } else {
        "cancelled".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use orderstream_core::{CustomerId, Order, OrderId, OrderStatus};
    use orderstream_events::{EventType, InMemoryEventLog, LogRecord};

    fn settings(capacity: usize) -> GatewaySettings {
        GatewaySettings {
            group_prefix: "test-gateway".to_string(),
            buffer_capacity: capacity,
            read_batch: 16,
            drain_grace: Duration::from_millis(200),
            read_backoff: crate::retry::transient_backoff(Duration::from_millis(1), 2),
        }
    }

    fn log() -> InMemoryEventLog {
        InMemoryEventLog::with_block_interval(Duration::from_millis(20))
    }

    fn gateway(log: &InMemoryEventLog, capacity: usize) -> StreamGateway {
        StreamGateway::new(Arc::new(log.clone()), settings(capacity))
    }

    fn order(id: &str, status: OrderStatus, version: u64) -> Order {
        Order::new(
            OrderId::parse(id).unwrap(),
            CustomerId::parse("customer-1").unwrap(),
            status,
            25.0,
            version,
        )
    }

    async fn append(log: &InMemoryEventLog, event: &OrderEvent) {
        log.append(LogRecord::new(event.partition_key(), event.to_json().unwrap()))
            .await
            .unwrap();
    }

    async fn next_event(handle: &mut SubscriptionHandle) -> OrderEvent {
        match tokio::time::timeout(Duration::from_secs(2), handle.recv()).await {
            Ok(Some(Delivery::Event(event))) => event,
            other => panic!("expected event, got {other:?}"),
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn delivers_lifecycle_in_commit_order() {
        let log = log();
        let gateway = gateway(&log, 16);
        let mut handle = gateway.open(StatusFilter::All).await.unwrap();
        assert_eq!(handle.state(), SubscriptionState::Active);

        let created = order("e1", OrderStatus::Pending, 1);
        let confirmed = order("e1", OrderStatus::Confirmed, 2);
        let shipped = order("e1", OrderStatus::Shipped, 3);
        append(&log, &OrderEvent::created(&created)).await;
        append(
            &log,
            &OrderEvent::status_changed(&confirmed, OrderStatus::Pending, OrderStatus::Confirmed).unwrap(),
        )
        .await;
        append(
            &log,
            &OrderEvent::status_changed(&shipped, OrderStatus::Confirmed, OrderStatus::Shipped).unwrap(),
        )
        .await;

        let first = next_event(&mut handle).await;
        let second = next_event(&mut handle).await;
        let third = next_event(&mut handle).await;

        assert_eq!(
            [first.version(), second.version(), third.version()],
            [1, 2, 3]
        );
        assert_eq!(first.event_type(), EventType::Created);
        assert_eq!(second.event_type(), EventType::StatusChanged);
        assert_eq!(second.old_status(), Some(OrderStatus::Pending));
        assert_eq!(second.new_status(), Some(OrderStatus::Confirmed));
        assert_eq!(third.old_status(), Some(OrderStatus::Confirmed));
        assert_eq!(third.new_status(), Some(OrderStatus::Shipped));
        assert_eq!(handle.gaps(), 0);
    }

    #[tokio::test]
    async fn new_session_starts_from_now() {
        let log = log();
        append(&log, &OrderEvent::created(&order("old", OrderStatus::Pending, 1))).await;

        let gateway = gateway(&log, 16);
        let mut handle = gateway.open(StatusFilter::All).await.unwrap();
        append(&log, &OrderEvent::created(&order("new", OrderStatus::Pending, 1))).await;

        assert_eq!(next_event(&mut handle).await.order_id().as_str(), "new");
    }

    #[tokio::test]
    async fn filter_uses_effective_status() {
        let log = log();
        let gateway = gateway(&log, 16);
        let mut shipped_only = gateway
            .open(StatusFilter::only([OrderStatus::Shipped]))
            .await
            .unwrap();

        append(&log, &OrderEvent::created(&order("o1", OrderStatus::Pending, 1))).await;
        append(
            &log,
            &OrderEvent::status_changed(&order("o1", OrderStatus::Confirmed, 2), OrderStatus::Pending, OrderStatus::Confirmed)
                .unwrap(),
        )
        .await;
        append(
            &log,
            &OrderEvent::status_changed(&order("o1", OrderStatus::Shipped, 3), OrderStatus::Confirmed, OrderStatus::Shipped)
                .unwrap(),
        )
        .await;
        append(&log, &OrderEvent::updated(&order("o1", OrderStatus::Shipped, 4))).await;

        let first = next_event(&mut shipped_only).await;
        let second = next_event(&mut shipped_only).await;
        assert_eq!(first.version(), 3);
        assert_eq!(second.version(), 4);
        assert!(shipped_only.pending() == 0);
    }

    #[tokio::test]
    async fn slow_subscriber_gaps_without_delaying_others() {
        let log = log();
        let gateway = gateway(&log, 2);
        let stalled = gateway.open(StatusFilter::All).await.unwrap();
        let mut live = gateway.open(StatusFilter::All).await.unwrap();

        for version in 1..=6 {
            let event = OrderEvent::updated(&order("hot", OrderStatus::Pending, version));
            append(&log, &event).await;
            assert_eq!(next_event(&mut live).await.version(), version);
        }

        wait_until(|| stalled.gaps() == 4).await;
        assert_eq!(stalled.pending(), 2);
        assert_eq!(live.gaps(), 0);
    }

    #[tokio::test]
    async fn gap_is_reported_before_next_event() {
        let log = log();
        let gateway = gateway(&log, 1);
        let mut handle = gateway.open(StatusFilter::All).await.unwrap();

        for version in 1..=3 {
            append(&log, &OrderEvent::updated(&order("o1", OrderStatus::Pending, version))).await;
        }
        wait_until(|| handle.gaps() == 2).await;

        let gap = tokio::time::timeout(Duration::from_secs(1), handle.recv()).await.unwrap();
        assert_eq!(gap, Some(Delivery::Gap { dropped: 2 }));
        assert_eq!(next_event(&mut handle).await.version(), 3);
    }

    #[tokio::test]
    async fn malformed_records_are_counted_and_skipped() {
        let log = log();
        let gateway = gateway(&log, 8);
        let mut handle = gateway.open(StatusFilter::All).await.unwrap();

        log.append(LogRecord::new("o1", "not json")).await.unwrap();
        log.append(LogRecord::new("o1", r#"{"event_type":"order.created"}"#))
            .await
            .unwrap();
        append(&log, &OrderEvent::created(&order("o1", OrderStatus::Pending, 1))).await;

        assert_eq!(next_event(&mut handle).await.version(), 1);
        assert_eq!(handle.malformed(), 2);
    }

    #[tokio::test]
    async fn open_fails_when_log_unreachable() {
        let log = log();
        log.set_available(false);
        let gateway = gateway(&log, 8);

        let err = gateway.open(StatusFilter::All).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
        assert_eq!(gateway.active_sessions(), 0);
        assert_eq!(log.active_groups(), 0);

        let disabled = StreamGateway::disabled();
        assert!(matches!(
            disabled.open(StatusFilter::All).await,
            Err(GatewayError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn repeated_connect_disconnect_leaks_nothing() {
        let log = log();
        let gateway = gateway(&log, 8);

        for _ in 0..20 {
            let handle = gateway.open(StatusFilter::All).await.unwrap();
            drop(handle);
        }

        wait_until(|| gateway.active_sessions() == 0 && log.active_groups() == 0).await;
    }

    #[tokio::test]
    async fn outage_mid_stream_terminates_with_reason() {
        let log = log();
        let gateway = gateway(&log, 8);
        let mut handle = gateway.open(StatusFilter::All).await.unwrap();

        log.set_available(false);

        let mut reason = None;
        while let Ok(Some(delivery)) = tokio::time::timeout(Duration::from_secs(2), handle.recv()).await {
            if let Delivery::Terminated { reason: r } = delivery {
                reason = Some(r);
            }
        }
        let reason = reason.expect("stream should terminate");
        assert!(reason.contains("event log read failed"), "reason: {reason}");

        wait_until(|| handle.state() == SubscriptionState::Closed).await;
        assert_eq!(gateway.active_sessions(), 0);
    }

    #[tokio::test]
    async fn shutdown_drains_and_closes_sessions() {
        let log = log();
        let gateway = gateway(&log, 8);
        let mut handle = gateway.open(StatusFilter::All).await.unwrap();
        append(&log, &OrderEvent::created(&order("o1", OrderStatus::Pending, 1))).await;
        wait_until(|| handle.pending() == 1).await;

        let shutdown = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.shutdown().await })
        };

        assert_eq!(next_event(&mut handle).await.version(), 1);
        let terminal = tokio::time::timeout(Duration::from_secs(1), handle.recv()).await.unwrap();
        assert_eq!(
            terminal,
            Some(Delivery::Terminated { reason: "server shutting down".to_string() })
        );
        assert_eq!(handle.recv().await, None);

        shutdown.await.unwrap();
        assert_eq!(handle.state(), SubscriptionState::Closed);
        assert_eq!(gateway.active_sessions(), 0);
        assert_eq!(log.active_groups(), 0);
        assert!(matches!(
            gateway.open(StatusFilter::All).await,
            Err(GatewayError::ShuttingDown)
        ));
    }
}
