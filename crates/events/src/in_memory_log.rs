//! In-memory durable log for tests/dev.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::log::{EventLog, LogCursor, LogError, LogRecord};

const DEFAULT_BLOCK: Duration = Duration::from_millis(100);

/// In-memory append-only log.
///
/// - One totally ordered sequence (so per-key order holds trivially)
/// - Consumer groups start at the end of the log when they join
/// - Fault injection for outage/retry scenarios
#[derive(Debug, Clone)]
pub struct InMemoryEventLog {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    records: Mutex<Vec<LogRecord>>,
    /// Current record count; cursors wait on changes.
    len_tx: watch::Sender<usize>,
    groups: Mutex<HashSet<String>>,
    available: AtomicBool,
    closed: AtomicBool,
    failing_appends: AtomicUsize,
    append_latency: Mutex<Option<Duration>>,
    block: Duration,
}

impl Inner {
    fn check_open(&self) -> Result<(), LogError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LogError::Closed);
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable("in-memory log marked unavailable".to_string()));
        }
        Ok(())
    }

    fn wake_cursors(&self) {
        let len = self.records.lock().map(|r| r.len()).unwrap_or(0);
        self.len_tx.send_replace(len);
    }
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::with_block_interval(DEFAULT_BLOCK)
    }

    /// Create a log whose cursors wait at most `block` for new records.
    pub fn with_block_interval(block: Duration) -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(Vec::new()),
                len_tx,
                groups: Mutex::new(HashSet::new()),
                available: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                failing_appends: AtomicUsize::new(0),
                append_latency: Mutex::new(None),
                block,
            }),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
        self.inner.wake_cursors();
    }

    /// Make the next `n` appends fail with a transient error.
    pub fn fail_next_appends(&self, n: usize) {
        self.inner.failing_appends.store(n, Ordering::SeqCst);
    }

    /// Delay every append by `latency` before it is applied.
    pub fn set_append_latency(&self, latency: Option<Duration>) {
        if let Ok(mut guard) = self.inner.append_latency.lock() {
            *guard = latency;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all records in log order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.inner
            .records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of consumer groups that currently have a member.
    pub fn active_groups(&self) -> usize {
        self.inner.groups.lock().map(|g| g.len()).unwrap_or(0)
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, record: LogRecord) -> Result<(), LogError> {
        let latency = self.inner.append_latency.lock().map(|g| *g).unwrap_or(None);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.inner.check_open()?;
        if self
            .inner
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(LogError::Unavailable("injected append failure".to_string()));
        }

        let len = {
            let mut records = self
                .inner
                .records
                .lock()
                .map_err(|_| LogError::Command("lock poisoned".to_string()))?;
            records.push(record);
            records.len()
        };
        self.inner.len_tx.send_replace(len);
        Ok(())
    }

    async fn join(&self, group: &str) -> Result<Box<dyn LogCursor>, LogError> {
        self.inner.check_open()?;

        // Subscribe before reading the position so no append is missed.
        let rx = self.inner.len_tx.subscribe();
        let position = self.len();

        self.inner
            .groups
            .lock()
            .map_err(|_| LogError::Command("lock poisoned".to_string()))?
            .insert(group.to_string());

        Ok(Box::new(InMemoryCursor {
            inner: self.inner.clone(),
            group: group.to_string(),
            position,
            rx,
        }))
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.wake_cursors();
    }
}

#[derive(Debug)]
struct InMemoryCursor {
    inner: Arc<Inner>,
    group: String,
    position: usize,
    rx: watch::Receiver<usize>,
}

#[async_trait]
impl LogCursor for InMemoryCursor {
    async fn next_batch(&mut self, max: usize) -> Result<Vec<LogRecord>, LogError> {
        let max = max.max(1);
        loop {
            self.inner.check_open()?;

            let batch = {
                let records = self
                    .inner
                    .records
                    .lock()
                    .map_err(|_| LogError::Command("lock poisoned".to_string()))?;
                if self.position < records.len() {
                    let end = records.len().min(self.position + max);
                    records[self.position..end].to_vec()
                } else {
                    Vec::new()
                }
            };

            if !batch.is_empty() {
                self.position += batch.len();
                return Ok(batch);
            }

            match tokio::time::timeout(self.inner.block, self.rx.changed()).await {
                Err(_) => return Ok(Vec::new()),
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(LogError::Closed),
            }
        }
    }

    async fn leave(self: Box<Self>) -> Result<(), LogError> {
        // Group removal happens in Drop so aborted sessions are cleaned up too.
        drop(self);
        Ok(())
    }
}

impl Drop for InMemoryCursor {
    fn drop(&mut self) {
        if let Ok(mut groups) = self.inner.groups.lock() {
            groups.remove(&self.group);
        }
    }
}
