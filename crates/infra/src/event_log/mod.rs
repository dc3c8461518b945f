//! Durable log adapters and process-wide log construction.

#[cfg(feature = "redis")]
pub mod redis_streams;

use std::sync::Arc;

use orderstream_events::{EventLog, LogError};
use tracing::info;

use crate::config::MessagingConfig;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsLog;

/// Build the shared log connection for this process.
///
/// Returns `Ok(None)` when messaging is disabled. The connection itself is
/// established lazily, so an unreachable server here is not an error.
pub fn connect_log(config: &MessagingConfig) -> Result<Option<Arc<dyn EventLog>>, LogError> {
    if !config.enabled {
        info!("messaging disabled; no durable log configured");
        return Ok(None);
    }

    #[cfg(feature = "redis")]
    {
        let log = RedisStreamsLog::new(config)?;
        info!(
            channel = %config.channel,
            partitions = config.partitions,
            endpoints = config.log_urls.len(),
            "redis streams event log configured"
        );
        Ok(Some(Arc::new(log)))
    }

    #[cfg(not(feature = "redis"))]
    {
        Err(LogError::Config(
            "messaging enabled but built without the `redis` feature".to_string(),
        ))
    }
}

/// Stable partition index for a record key (FNV-1a, 32-bit).
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash % partitions
}

/// Name of the stream backing partition `index`.
pub fn stream_name(channel: &str, partitions: u32, index: u32) -> String {
    if partitions <= 1 {
        channel.to_string()
    } else {
        format!("{channel}:{index}")
    }
}
