//! Redis Streams-backed durable log (at-least-once, consumer groups).
//!
//! ## Layout
//!
//! - **Streams**: `<channel>` with one partition, `<channel>:<n>` otherwise.
//!   A key always hashes to the same stream, so per-key order is preserved.
//! - **Records**: fields `key`, `event_type`, `version` (inspection only) and
//!   `payload` (the JSON envelope).
//! - **Retention**: `XADD ... MAXLEN ~ <retention_max_len>`.
//! - **Consumer groups**: one per streaming session, created at `$` so a new
//!   session only sees records appended after it joined, and destroyed when
//!   the session leaves.
//!
//! Appends and group management share one `ConnectionManager` (created lazily,
//! reconnects on its own). Each cursor reads with `XREADGROUP ... BLOCK` on a
//! dedicated connection so blocking reads never stall the shared one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::StreamReadReply;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use orderstream_events::{EventLog, LogCursor, LogError, LogRecord};

use super::{partition_for, stream_name};
use crate::config::MessagingConfig;

const FIELD_KEY: &str = "key";
const FIELD_EVENT_TYPE: &str = "event_type";
const FIELD_VERSION: &str = "version";
const FIELD_PAYLOAD: &str = "payload";

/// Upper bound for establishing a connection to one endpoint.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct RedisStreamsLog {
    inner: Arc<Inner>,
}

struct Inner {
    clients: Vec<redis::Client>,
    shared: Mutex<Option<ConnectionManager>>,
    channel: String,
    partitions: u32,
    retention_max_len: u64,
    read_block: Duration,
    closed: AtomicBool,
}

impl core::fmt::Debug for RedisStreamsLog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStreamsLog")
            .field("channel", &self.inner.channel)
            .field("partitions", &self.inner.partitions)
            .field("endpoints", &self.inner.clients.len())
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish()
    }
}

/// Inspection fields lifted from the payload; absent fields are left out.
#[derive(Deserialize)]
struct PayloadHeaders {
    event_type: Option<String>,
    version: Option<u64>,
}

impl RedisStreamsLog {
    /// Validate endpoints without connecting.
    pub fn new(config: &MessagingConfig) -> Result<Self, LogError> {
        if config.log_urls.is_empty() {
            return Err(LogError::Config("no endpoint configured".to_string()));
        }
        let clients = config
            .log_urls
            .iter()
            .map(|url| {
                redis::Client::open(url.as_str())
                    .map_err(|e| LogError::Config(format!("invalid endpoint '{url}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            inner: Arc::new(Inner {
                clients,
                shared: Mutex::new(None),
                channel: config.channel.clone(),
                partitions: config.partitions.max(1),
                retention_max_len: config.retention_max_len,
                read_block: config.read_block,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    fn streams(&self) -> Vec<String> {
        (0..self.inner.partitions)
            .map(|i| stream_name(&self.inner.channel, self.inner.partitions, i))
            .collect()
    }

    fn ensure_open(&self) -> Result<(), LogError> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(LogError::Closed)
        } else {
            Ok(())
        }
    }

    /// Shared connection, created on first use against the first reachable endpoint.
    async fn shared(&self) -> Result<ConnectionManager, LogError> {
        self.ensure_open()?;
        let mut slot = self.inner.shared.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let mut last_error = LogError::Unavailable("no endpoint reachable".to_string());
        for client in &self.inner.clients {
            match tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client.clone())).await {
                Ok(Ok(conn)) => {
                    debug!(endpoint = ?client.get_connection_info().addr, "connected to event log");
                    *slot = Some(conn.clone());
                    return Ok(conn);
                }
                Ok(Err(e)) => {
                    warn!(endpoint = ?client.get_connection_info().addr, error = %e, "event log endpoint unreachable");
                    last_error = map_redis_error(e);
                }
                Err(_) => {
                    warn!(endpoint = ?client.get_connection_info().addr, "event log connect timed out");
                    last_error = LogError::Timeout;
                }
            }
        }
        Err(last_error)
    }

    /// Dedicated connection for one cursor's blocking reads.
    async fn dedicated(&self) -> Result<MultiplexedConnection, LogError> {
        let mut last_error = LogError::Unavailable("no endpoint reachable".to_string());
        for client in &self.inner.clients {
            match tokio::time::timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection()).await {
                Ok(Ok(conn)) => return Ok(conn),
                Ok(Err(e)) => last_error = map_redis_error(e),
                Err(_) => last_error = LogError::Timeout,
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl EventLog for RedisStreamsLog {
    #[instrument(skip(self, record), fields(key = %record.key), err)]
    async fn append(&self, record: LogRecord) -> Result<(), LogError> {
        let mut conn = self.shared().await?;
        let partition = partition_for(&record.key, self.inner.partitions);
        let stream = stream_name(&self.inner.channel, self.inner.partitions, partition);

        let headers: Option<PayloadHeaders> = serde_json::from_str(&record.payload).ok();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.inner.retention_max_len)
            .arg("*")
            .arg(FIELD_KEY)
            .arg(&record.key);
        if let Some(headers) = headers {
            if let Some(event_type) = headers.event_type {
                cmd.arg(FIELD_EVENT_TYPE).arg(event_type);
            }
            if let Some(version) = headers.version {
                cmd.arg(FIELD_VERSION).arg(version);
            }
        }
        cmd.arg(FIELD_PAYLOAD).arg(&record.payload);

        let id: String = cmd.query_async(&mut conn).await.map_err(map_redis_error)?;
        debug!(stream = %stream, id = %id, "appended record");
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn join(&self, group: &str) -> Result<Box<dyn LogCursor>, LogError> {
        let mut conn = self.shared().await?;
        let streams = self.streams();

        for stream in &streams {
            let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(stream)
                .arg(group)
                .arg("$")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;
            match created {
                Ok(_) => {}
                Err(e) if e.code() == Some("BUSYGROUP") => {}
                Err(e) => return Err(map_redis_error(e)),
            }
        }

        let reader = match self.dedicated().await {
            Ok(reader) => reader,
            Err(e) => {
                let _ = destroy_group(&mut conn, &streams, group).await;
                return Err(e);
            }
        };

        debug!(group = %group, streams = streams.len(), "joined consumer group");
        Ok(Box::new(RedisStreamsCursor {
            log: self.clone(),
            reader,
            streams,
            group: group.to_string(),
            consumer: format!("{group}-reader"),
        }))
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shared.lock().await.take();
        debug!(channel = %self.inner.channel, "event log closed");
    }
}

struct RedisStreamsCursor {
    log: RedisStreamsLog,
    reader: MultiplexedConnection,
    streams: Vec<String>,
    group: String,
    consumer: String,
}

#[async_trait]
impl LogCursor for RedisStreamsCursor {
    async fn next_batch(&mut self, max: usize) -> Result<Vec<LogRecord>, LogError> {
        self.log.ensure_open()?;
        let block_ms = u64::try_from(self.log.inner.read_block.as_millis()).unwrap_or(u64::MAX);

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(max.max(1))
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS");
        for stream in &self.streams {
            cmd.arg(stream);
        }
        for _ in &self.streams {
            cmd.arg(">");
        }

        // Nil reply means the block interval expired with nothing new.
        let reply: Option<StreamReadReply> = cmd
            .query_async(&mut self.reader)
            .await
            .map_err(map_redis_error)?;
        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for stream in reply.keys {
            let mut ids = Vec::with_capacity(stream.ids.len());
            for entry in stream.ids {
                let key: String = entry.get(FIELD_KEY).unwrap_or_default();
                let payload: String = entry.get(FIELD_PAYLOAD).unwrap_or_default();
                records.push(LogRecord::new(key, payload));
                ids.push(entry.id);
            }
            if ids.is_empty() {
                continue;
            }
            // Records are handed to the caller right after this; ack them now.
            let acked: Result<u64, redis::RedisError> = redis::cmd("XACK")
                .arg(&stream.key)
                .arg(&self.group)
                .arg(&ids)
                .query_async(&mut self.reader)
                .await;
            if let Err(e) = acked {
                warn!(stream = %stream.key, group = %self.group, error = %e, "failed to ack records");
            }
        }
        Ok(records)
    }

    async fn leave(self: Box<Self>) -> Result<(), LogError> {
        let mut cursor = *self;
        let outcome = destroy_group(&mut cursor.reader, &cursor.streams, &cursor.group).await;
        debug!(group = %cursor.group, "left consumer group");
        outcome
    }
}

async fn destroy_group<C>(conn: &mut C, streams: &[String], group: &str) -> Result<(), LogError>
where
    C: redis::aio::ConnectionLike + Send,
{
    let mut outcome = Ok(());
    for stream in streams {
        let destroyed: Result<u64, redis::RedisError> = redis::cmd("XGROUP")
            .arg("DESTROY")
            .arg(stream)
            .arg(group)
            .query_async(conn)
            .await;
        if let Err(e) = destroyed {
            warn!(stream = %stream, group = %group, error = %e, "failed to destroy consumer group");
            outcome = Err(map_redis_error(e));
        }
    }
    outcome
}

fn map_redis_error(e: redis::RedisError) -> LogError {
    if e.is_timeout() {
        LogError::Timeout
    } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        LogError::Unavailable(e.to_string())
    } else {
        LogError::Command(e.to_string())
    }
}
