//! `orderstream-events`: the order event model and the contracts around it.
//!
//! - [`OrderEvent`]: immutable wire envelope
//! - [`EventPublisher`]: publish contract (+ inert [`NoopPublisher`])
//! - [`EventLog`]/[`LogCursor`]: durable log abstraction (+ [`InMemoryEventLog`])
//! - [`StatusFilter`]: subscription filtering
//! - [`VersionWatermark`]/[`LatestOrderView`]: redelivery-tolerant consumption

pub mod envelope;
pub mod filter;
pub mod in_memory_log;
pub mod log;
pub mod noop;
pub mod publisher;
pub mod watermark;

pub use envelope::{EnvelopeError, EventType, OrderEvent};
pub use filter::StatusFilter;
pub use in_memory_log::InMemoryEventLog;
pub use log::{EventLog, LogCursor, LogError, LogRecord};
pub use noop::NoopPublisher;
pub use publisher::{EventPublisher, PublishContext, PublishError};
pub use watermark::{LatestOrderView, Observation, VersionWatermark};
