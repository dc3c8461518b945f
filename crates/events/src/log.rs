//! Durable event log abstraction (mechanics only).
//!
//! The log is the store of record for published envelopes and the source
//! the streaming gateway consumes from. It is modeled after a partitioned,
//! keyed log with consumer groups:
//!
//! - **Keyed appends**: records sharing a key are totally ordered.
//! - **Consumer groups**: each group has its own read position; joining a
//!   group starts reading at "now" (nothing older is replayed).
//! - **At-least-once**: a record may be read more than once; consumers
//!   tolerate this via version watermarks.
//!
//! The connection behind an `EventLog` is a process-wide resource created at
//! startup, shared by the publisher and the gateway, and closed at shutdown.

use async_trait::async_trait;
use thiserror::Error;

/// One record on the durable log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Partition/ordering key (the order id).
    pub key: String,
    /// Self-describing payload (JSON envelope).
    pub payload: String,
}

impl LogRecord {
    pub fn new(key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogError {
    /// Connection-level failure (server down, connection reset, ...).
    #[error("event log unavailable: {0}")]
    Unavailable(String),

    #[error("event log operation timed out")]
    Timeout,

    /// The server rejected a command.
    #[error("event log command failed: {0}")]
    Command(String),

    /// Endpoint or channel configuration is unusable.
    #[error("event log misconfigured: {0}")]
    Config(String),

    /// The log was shut down by this process.
    #[error("event log closed")]
    Closed,
}

impl LogError {
    /// Transient errors are worth retrying; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, LogError::Unavailable(_) | LogError::Timeout)
    }
}

/// Shared handle to the durable log.
#[async_trait]
pub trait EventLog: Send + Sync + core::fmt::Debug {
    /// Append one record, returning once the log acknowledged it.
    async fn append(&self, record: LogRecord) -> Result<(), LogError>;

    /// Join `group` as its only member, positioned at the current end of the log.
    async fn join(&self, group: &str) -> Result<Box<dyn LogCursor>, LogError>;

    /// Tear the shared connection down. Subsequent calls fail with [`LogError::Closed`].
    async fn close(&self);
}

/// Read position of one consumer group member.
#[async_trait]
pub trait LogCursor: Send {
    /// Next records in log order, at most `max`.
    ///
    /// Waits a bounded amount of time for new records and returns an empty
    /// batch if none arrived.
    async fn next_batch(&mut self, max: usize) -> Result<Vec<LogRecord>, LogError>;

    /// Leave the group and release its server-side state.
    async fn leave(self: Box<Self>) -> Result<(), LogError>;
}
