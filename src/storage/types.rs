//! Core data types for the storage layer.
//!
//! - [`LogEntry`]: one stored log record
//! - [`LogLevel`]: ordinal severity
//! - [`InputLogPayload`] / [`OutputLogPayload`]: wire shapes of ingested and served records
//! - [`Envelope`]: `{code, message, data}` response wrapper shared by query endpoints
//! - [`QueryOption`]: a streaming query request

use std::collections::BTreeMap;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString, FromRepr};

use crate::storage::StorageError;

// =============================================================================
// Constants
// =============================================================================

/// Default number of rows per streamed batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Response codes carried by [`Envelope`]. Values follow HTTP status codes.
pub mod code {
    /// Request succeeded; a batch or listing follows.
    pub const OK: u16 = 200;
    /// Stream finished normally. Always the last message of a successful stream.
    pub const NO_CONTENT: u16 = 204;
    /// Request was invalid (e.g., missing tag).
    pub const BAD_REQUEST: u16 = 400;
    /// Backend failure.
    pub const INTERNAL_ERROR: u16 = 500;
}

// =============================================================================
// Log Level
// =============================================================================

/// Log severity, ordered from least to most severe.
///
/// Stored by ordinal. Unknown names map to [`LogLevel::Trace`].
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
    FromRepr,
)]
#[repr(i32)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    #[default]
    Trace = 0,
    Debug = 1,
    Info = 2,
    #[strum(to_string = "warn", serialize = "warning")]
    Warn = 3,
    Error = 4,
    #[strum(to_string = "fatal", serialize = "critical")]
    Fatal = 5,
}

impl LogLevel {
    /// Parse a level name, falling back to the lowest severity.
    pub fn parse_lenient(name: Option<&str>) -> Self {
        name.and_then(|n| n.trim().parse().ok()).unwrap_or_default()
    }

    /// Map a stored ordinal back to a level, falling back to the lowest severity.
    pub fn from_ordinal(ordinal: i32) -> Self {
        Self::from_repr(ordinal).unwrap_or_default()
    }

    /// Ordinal used for storage and threshold comparison.
    pub fn ordinal(self) -> i32 {
        self as i32
    }
}

// =============================================================================
// Log Entry
// =============================================================================

/// A stored log record.
///
/// `context_keys[i]` pairs with `context_values[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub tag: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// `YYYYMMDD` of `timestamp` (UTC).
    pub date: String,
    pub container_name: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub context_keys: Vec<String>,
    pub context_values: Vec<String>,
}

impl LogEntry {
    /// Rebuild the context map from the parallel key/value vectors.
    pub fn context(&self) -> BTreeMap<String, String> {
        self.context_keys
            .iter()
            .cloned()
            .zip(self.context_values.iter().cloned())
            .collect()
    }
}

/// Format an epoch-millisecond timestamp as `YYYYMMDD` in UTC.
///
/// ```
/// assert_eq!(hermes::storage::to_yyyymmdd(1_588_842_127_114), "20200507");
/// ```
pub fn to_yyyymmdd(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .format("%Y%m%d")
        .to_string()
}

/// Render a `YYYYMMDD` key as `YYYY-MM-DD`. Other inputs are returned unchanged.
pub fn format_date_key(key: &str) -> String {
    if key.len() == 8 && key.bytes().all(|b| b.is_ascii_digit()) {
        format!("{}-{}-{}", &key[0..4], &key[4..6], &key[6..8])
    } else {
        key.to_string()
    }
}

// =============================================================================
// Wire Payloads
// =============================================================================

/// One line of an ingestion body. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InputLogPayload {
    pub tag: Option<String>,
    pub timestamp: Option<i64>,
    pub container_name: Option<String>,
    pub level: Option<String>,
    pub message: Option<String>,
    pub context: BTreeMap<String, String>,
}

/// A log record as served to query consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLogPayload {
    pub id: i64,
    /// Decimal id, for consumers that cannot hold 64-bit integers.
    pub id_str: String,
    pub date: String,
    pub tag: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub container_name: Option<String>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub context: BTreeMap<String, String>,
}

impl From<LogEntry> for OutputLogPayload {
    fn from(entry: LogEntry) -> Self {
        let context = entry.context();
        Self {
            id: entry.id,
            id_str: entry.id.to_string(),
            date: entry.date,
            tag: entry.tag,
            timestamp: entry.timestamp,
            container_name: entry.container_name,
            level: entry.level,
            message: entry.message,
            context,
        }
    }
}

/// Tag history bucket: raw `YYYYMMDD` key and its `YYYY-MM-DD` rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagHistory {
    pub key: String,
    pub value: String,
}

impl TagHistory {
    pub fn from_key(key: String) -> Self {
        let value = format_date_key(&key);
        Self { key, value }
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// `{code, message, data}` response wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default = "Option::default")]
    pub data: Option<Vec<T>>,
}

impl<T> Envelope<T> {
    /// Successful response carrying `data`.
    pub fn ok(data: Vec<T>) -> Self {
        Self {
            code: code::OK,
            message: "OK".to_string(),
            data: Some(data),
        }
    }

    /// End-of-stream sentinel.
    pub fn no_content() -> Self {
        Self {
            code: code::NO_CONTENT,
            message: "no content".to_string(),
            data: None,
        }
    }

    /// Failure response without data.
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == code::OK
    }
}

/// One message of a streaming query.
pub type BatchMessage = Envelope<OutputLogPayload>;

// =============================================================================
// Query
// =============================================================================

/// A streaming query request.
///
/// Matches rows with `tag == self.tag`, `level >= self.level` and
/// `start_time <= timestamp <= end_time`, in ascending timestamp order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOption {
    pub tag: String,
    pub level: LogLevel,
    pub start_time: i64,
    pub end_time: i64,
    pub batch_size: usize,
}

impl QueryOption {
    /// Query every level over the whole time range.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            level: LogLevel::Trace,
            start_time: 0,
            end_time: i64::MAX,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_range(mut self, start_time: i64, end_time: i64) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Check the request before it reaches a driver.
    ///
    /// # Errors
    /// [`StorageError::MissingTag`] for a blank tag,
    /// [`StorageError::InvalidData`] for a zero batch size.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.tag.trim().is_empty() {
            return Err(StorageError::MissingTag);
        }
        if self.batch_size == 0 {
            return Err(StorageError::InvalidData(
                "batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `entry` falls inside this query.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        entry.tag == self.tag
            && entry.level >= self.level
            && entry.timestamp >= self.start_time
            && entry.timestamp <= self.end_time
    }
}
