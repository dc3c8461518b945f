//! Infrastructure layer: configuration, the durable log adapter, publishing,
//! the order service and the streaming gateway.

pub mod config;
pub mod event_log;
pub mod gateway;
pub mod order_service;
pub mod order_store;
pub mod publisher;
pub mod retry;

pub use config::{ConfigError, MessagingConfig};
pub use event_log::connect_log;
pub use gateway::{
    Delivery, GatewayError, GatewaySettings, StreamGateway, SubscriptionHandle, SubscriptionState,
};
pub use order_service::{DispatchSettings, OrderService};
pub use order_store::{InMemoryOrderStore, NewOrder, OrderStore, OrderUpdate, StatusChange, StoreError};
pub use publisher::{BrokerPublisher, PublishSettings, select_publisher};
