//! Process-wide resources shared by all handlers.
//!
//! The durable log connection is created once here, handed to the publisher
//! and the gateway, and closed in [`AppServices::shutdown`]. Whether messaging
//! is on follows from the log alone: `connect_log` yields none when it is off.

use std::sync::Arc;

use tracing::info;

use orderstream_events::{EventLog, EventPublisher, LogError};
use orderstream_infra::{
    DispatchSettings, GatewaySettings, InMemoryOrderStore, MessagingConfig, OrderService,
    StreamGateway, connect_log, select_publisher,
};

pub struct AppServices {
    config: MessagingConfig,
    log: Option<Arc<dyn EventLog>>,
    pub orders: OrderService<InMemoryOrderStore>,
    pub gateway: StreamGateway,
}

impl AppServices {
    /// Wire everything from configuration (connects lazily). Must be called
    /// within a Tokio runtime.
    pub fn from_config(config: MessagingConfig) -> Result<Self, LogError> {
        let log = connect_log(&config)?;
        Ok(Self::with_log(config, log))
    }

    /// Wire around an already constructed log (`None` selects the fallback publisher).
    pub fn with_log(config: MessagingConfig, log: Option<Arc<dyn EventLog>>) -> Self {
        let publisher: Arc<dyn EventPublisher> = select_publisher(&config, log.clone());
        let gateway = match &log {
            Some(log) => StreamGateway::new(log.clone(), GatewaySettings::from_config(&config)),
            None => StreamGateway::disabled(),
        };
        let orders = OrderService::with_settings(
            InMemoryOrderStore::new(),
            publisher,
            DispatchSettings::from_config(&config),
        );

        Self {
            orders,
            gateway,
            log,
            config,
        }
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    pub fn messaging_enabled(&self) -> bool {
        self.log.is_some()
    }

    /// Terminate live streams, publish queued notifications, then close the
    /// shared log connection.
    pub async fn shutdown(&self) {
        self.gateway.shutdown().await;
        self.orders.shutdown().await;
        if let Some(log) = &self.log {
            log.close().await;
        }
        info!(
            dropped_notifications = self.orders.dropped_notifications(),
            "services shut down"
        );
    }
}
