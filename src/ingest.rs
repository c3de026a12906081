//! Log ingestion pipeline.
//!
//! Turns a newline-delimited JSON body into [`LogEntry`] values and hands
//! the batch to every registered driver concurrently. Write-path failures
//! are logged; producers never see them.

use std::sync::Arc;

use futures::future::join_all;

use crate::id::IdGenerator;
use crate::storage::{
    DriverRegistry, InputLogPayload, LogEntry, LogLevel, StorageError, to_yyyymmdd,
};

/// Counters for one ingested body.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    /// Entries handed to the drivers.
    pub accepted: usize,
    /// Non-empty lines that were malformed or had a blank message.
    pub skipped: usize,
    /// Drivers whose `collect` failed.
    pub failed_drivers: usize,
}

/// Parses, stamps and fans out log lines.
#[derive(Clone)]
pub struct Ingestor {
    registry: Arc<DriverRegistry>,
    ids: Arc<IdGenerator>,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("node", &self.ids.node())
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    pub fn new(registry: Arc<DriverRegistry>, ids: Arc<IdGenerator>) -> Self {
        Self { registry, ids }
    }

    /// Build entries from `body`, stamping each with `tag`.
    ///
    /// Returns the entries and the number of skipped lines.
    pub fn parse_lines(&self, tag: &str, body: &str) -> (Vec<LogEntry>, usize) {
        let now = chrono::Utc::now().timestamp_millis();
        let mut entries = Vec::new();
        let mut skipped = 0;

        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let payload: InputLogPayload = match serde_json::from_str(line) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, tag, "Skipping malformed log line");
                    skipped += 1;
                    continue;
                }
            };

            let message = payload.message.unwrap_or_default();
            if message.trim().is_empty() {
                skipped += 1;
                continue;
            }

            let id = match self.ids.generate() {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(error = %e, tag, "Cannot assign log id");
                    skipped += 1;
                    continue;
                }
            };

            let timestamp = payload.timestamp.filter(|&t| t > 0).unwrap_or(now);
            let (context_keys, context_values) = payload.context.into_iter().unzip();
            entries.push(LogEntry {
                id,
                tag: tag.to_string(),
                timestamp,
                date: to_yyyymmdd(timestamp),
                container_name: payload.container_name.filter(|c| !c.is_empty()),
                level: LogLevel::parse_lenient(payload.level.as_deref()),
                message,
                context_keys,
                context_values,
            });
        }

        (entries, skipped)
    }

    /// Parse `body` and deliver it to every driver.
    ///
    /// A blank tag makes this a no-op.
    pub async fn ingest(&self, tag: &str, body: &str) -> IngestReport {
        let tag = tag.trim();
        if tag.is_empty() {
            tracing::debug!("Ignoring log batch without tag");
            return IngestReport::default();
        }

        let (entries, skipped) = self.parse_lines(tag, body);
        let failed_drivers = self.dispatch(&entries).await;

        tracing::debug!(tag, accepted = entries.len(), skipped, "Ingested log batch");
        IngestReport {
            accepted: entries.len(),
            skipped,
            failed_drivers,
        }
    }

    /// Hand `entries` to every driver concurrently; returns the failure count.
    ///
    /// An empty batch is not dispatched. A driver whose pool was busy gets
    /// one more attempt.
    pub async fn dispatch(&self, entries: &[LogEntry]) -> usize {
        if entries.is_empty() {
            return 0;
        }

        let results = join_all(self.registry.iter().map(|driver| async move {
            let mut result = driver.collect(entries).await;
            if result.as_ref().is_err_and(StorageError::is_retryable) {
                tracing::debug!(driver = %driver.name(), "Driver busy, retrying log delivery");
                result = driver.collect(entries).await;
            }
            (driver.name(), result)
        }))
        .await;

        results
            .into_iter()
            .filter(|(name, result)| match result {
                Ok(()) => false,
                Err(e) => {
                    tracing::warn!(driver = %name, error = %e, count = entries.len(), "Driver failed to collect logs");
                    true
                }
            })
            .count()
    }
}
