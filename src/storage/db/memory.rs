//! In-process log driver.
//!
//! Keeps the most recent `capacity` entries in memory. Useful as a secondary
//! fan-out target and for tests; nothing survives a restart.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use crate::config::DriverConfig;
use crate::storage::StorageError;
use crate::storage::driver::LogDriver;
use crate::storage::stream::{BatchSink, StreamOutcome, stream_batches};
use crate::storage::types::{Envelope, LogEntry, QueryOption, TagHistory, code};

/// Registered driver name.
pub const DRIVER_NAME: &str = "memory";

/// Default number of retained entries.
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Memory log driver. Oldest entries are evicted first.
pub struct MemoryDriver {
    capacity: usize,
    entries: RwLock<VecDeque<Arc<LogEntry>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MemoryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDriver")
            .field("capacity", &self.capacity)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MemoryDriver {
    /// Create a driver retaining at most `capacity` entries.
    ///
    /// # Errors
    /// `StorageError::Config` for a zero capacity.
    pub fn new(capacity: usize) -> Result<Self, StorageError> {
        if capacity == 0 {
            return Err(StorageError::Config(
                "memory driver capacity must be positive".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            entries: RwLock::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Open from driver options (`capacity`).
    pub fn open(config: &DriverConfig) -> Result<Self, StorageError> {
        let options = config.parse_options()?;
        let capacity = options.parse_or("capacity", DEFAULT_CAPACITY)?;
        let driver = Self::new(capacity)?;
        tracing::info!(capacity, "Memory driver opened");
        Ok(driver)
    }

    /// Number of retained entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Internal("memory driver is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LogDriver for MemoryDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    async fn collect(&self, entries: &[LogEntry]) -> Result<(), StorageError> {
        self.ensure_open()?;
        if entries.is_empty() {
            return Ok(());
        }

        let mut stored = self.entries.write().await;
        stored.extend(entries.iter().cloned().map(Arc::new));
        let overflow = stored.len().saturating_sub(self.capacity);
        if overflow > 0 {
            stored.drain(..overflow);
            tracing::trace!(evicted = overflow, "Evicted oldest log entries");
        }
        Ok(())
    }

    async fn find_all_tags(&self) -> Result<Vec<String>, StorageError> {
        self.ensure_open()?;
        let stored = self.entries.read().await;
        let tags: BTreeSet<&str> = stored.iter().map(|e| e.tag.as_str()).collect();
        Ok(tags.into_iter().map(str::to_string).collect())
    }

    async fn find_tag_history(&self, tag: &str) -> Result<Vec<TagHistory>, StorageError> {
        self.ensure_open()?;
        if tag.trim().is_empty() {
            return Err(StorageError::MissingTag);
        }

        let stored = self.entries.read().await;
        let dates: BTreeSet<&str> = stored
            .iter()
            .filter(|e| e.tag == tag)
            .map(|e| e.date.as_str())
            .collect();
        Ok(dates
            .into_iter()
            .rev()
            .map(|d| TagHistory::from_key(d.to_string()))
            .collect())
    }

    async fn fetch_log(
        &self,
        query: &QueryOption,
        sink: &BatchSink,
    ) -> Result<StreamOutcome, StorageError> {
        query.validate()?;
        if let Err(err) = self.ensure_open() {
            // The consumer may already be gone; the error is returned either way.
            let _ = sink
                .push(Envelope::error(code::INTERNAL_ERROR, err.to_string()))
                .await;
            return Err(err);
        }

        // The snapshot shares rows with the store; each row is copied only
        // when the engine takes it, so at most one batch is duplicated.
        let mut matched: Vec<Arc<LogEntry>> = {
            let stored = self.entries.read().await;
            stored.iter().filter(|e| query.matches(e)).cloned().collect()
        };
        matched.sort_by_key(|e| (e.timestamp, e.id));

        let rows = futures::stream::iter(
            matched
                .into_iter()
                .map(|row| Ok(Arc::unwrap_or_clone(row))),
        );
        Ok(stream_batches(rows, query.batch_size, sink).await)
    }

    async fn close(&self) -> Result<(), StorageError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.entries.write().await.clear();
            tracing::info!("Memory driver closed");
        }
        Ok(())
    }
}
