//! Publisher implementations and startup selection.

pub mod broker;

use std::sync::Arc;

use tracing::info;

use orderstream_events::{EventLog, EventPublisher, NoopPublisher};

use crate::config::MessagingConfig;

pub use broker::{BrokerPublisher, PublishSettings};

/// Choose the process-wide publisher.
///
/// Broker-backed when messaging is enabled and a log is available, the inert
/// publisher otherwise.
pub fn select_publisher(
    config: &MessagingConfig,
    log: Option<Arc<dyn EventLog>>,
) -> Arc<dyn EventPublisher> {
    match log {
        Some(log) if config.enabled => {
            info!(channel = %config.channel, "using broker-backed event publisher");
            Arc::new(BrokerPublisher::new(log, PublishSettings::from_config(config)))
        }
        _ => {
            info!("using no-op event publisher");
            Arc::new(NoopPublisher)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use orderstream_core::{CustomerId, Order, OrderId, OrderStatus};
    use orderstream_events::{InMemoryEventLog, LogError, OrderEvent, PublishContext, PublishError};
    use tokio_util::sync::CancellationToken;

    use crate::retry::transient_backoff;

    fn order(version: u64, status: OrderStatus) -> Order {
        Order::new(
            OrderId::parse("order-1").unwrap(),
            CustomerId::parse("customer-1").unwrap(),
            status,
            40.0,
            version,
        )
    }

    fn publisher(log: &InMemoryEventLog, retries: u32, timeout: Duration) -> BrokerPublisher {
        BrokerPublisher::new(
            Arc::new(log.clone()),
            PublishSettings {
                attempt_timeout: timeout,
                backoff: transient_backoff(Duration::from_millis(1), retries),
            },
        )
    }

    #[tokio::test]
    async fn appends_envelope_keyed_by_order_id() {
        let log = InMemoryEventLog::new();
        let publisher = publisher(&log, 0, Duration::from_secs(1));

        let order = order(1, OrderStatus::Pending);
        publisher
            .publish_created(&PublishContext::new(), &order)
            .await
            .unwrap();

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "order-1");
        let event = OrderEvent::from_json(&records[0].payload).unwrap();
        assert_eq!(event.version(), 1);
        assert_eq!(event.status(), OrderStatus::Pending);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let log = InMemoryEventLog::new();
        log.fail_next_appends(2);
        let publisher = publisher(&log, 3, Duration::from_secs(1));

        publisher
            .publish_updated(&PublishContext::new(), &order(2, OrderStatus::Pending))
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_reports_transport_error() {
        let log = InMemoryEventLog::new();
        log.set_available(false);
        let publisher = publisher(&log, 2, Duration::from_secs(1));

        let err = publisher
            .publish_updated(&PublishContext::new(), &order(2, OrderStatus::Pending))
            .await
            .unwrap_err();
        match err {
            PublishError::Transport { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(source.is_transient());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn slow_log_times_out_per_attempt() {
        let log = InMemoryEventLog::new();
        log.set_append_latency(Some(Duration::from_millis(200)));
        let publisher = publisher(&log, 0, Duration::from_millis(20));

        let err = publisher
            .publish_created(&PublishContext::new(), &order(1, OrderStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PublishError::Transport { attempts: 1, source: LogError::Timeout }
        ));
    }

    #[tokio::test]
    async fn cancellation_aborts_publish() {
        let log = InMemoryEventLog::new();
        log.set_available(false);
        let publisher = publisher(&log, 10, Duration::from_secs(1));

        let token = CancellationToken::new();
        token.cancel();
        let ctx = PublishContext::with_cancellation(token);

        let err = publisher
            .publish_created(&ctx, &order(1, OrderStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Cancelled));
    }

    #[tokio::test]
    async fn identical_status_change_is_malformed() {
        let log = InMemoryEventLog::new();
        let publisher = publisher(&log, 0, Duration::from_secs(1));

        let err = publisher
            .publish_status_changed(
                &PublishContext::new(),
                &order(2, OrderStatus::Confirmed),
                OrderStatus::Confirmed,
                OrderStatus::Confirmed,
            )
            .await
            .unwrap_err();
        assert!(err.is_malformed());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn selection_follows_config() {
        let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());

        let disabled = MessagingConfig::default();
        let publisher = select_publisher(&disabled, Some(log.clone()));
        publisher
            .publish_created(&PublishContext::new(), &order(1, OrderStatus::Pending))
            .await
            .unwrap();

        let enabled = MessagingConfig {
            enabled: true,
            log_urls: vec!["redis://localhost:6379".to_string()],
            ..MessagingConfig::default()
        };
        let in_memory = InMemoryEventLog::new();
        let publisher = select_publisher(&enabled, Some(Arc::new(in_memory.clone())));
        publisher
            .publish_created(&PublishContext::new(), &order(1, OrderStatus::Pending))
            .await
            .unwrap();
        assert_eq!(in_memory.len(), 1);
    }
}
