//! Storage driver trait.

use crate::storage::StorageError;
use crate::storage::stream::{BatchSink, StreamOutcome};
use crate::storage::types::{LogEntry, QueryOption, TagHistory};

/// A pluggable log storage backend.
///
/// Every configured driver receives every ingested batch; the main-storage
/// driver also serves queries. Drivers are shared as `Arc<dyn LogDriver>`.
///
/// # Error Handling
///
/// - `collect` failures are logged by the caller and never reach producers.
/// - `fetch_log` reports failures to the consumer through the sink before
///   returning them, so a live query always learns why it ended.
#[async_trait::async_trait]
pub trait LogDriver: Send + Sync + 'static {
    /// Registered backend name.
    fn name(&self) -> &str;

    /// Persist a batch of entries.
    async fn collect(&self, entries: &[LogEntry]) -> Result<(), StorageError>;

    /// Every distinct tag.
    async fn find_all_tags(&self) -> Result<Vec<String>, StorageError>;

    /// Distinct days holding entries for `tag`, newest first.
    ///
    /// # Errors
    /// `StorageError::MissingTag` for a blank tag.
    async fn find_tag_history(&self, tag: &str) -> Result<Vec<TagHistory>, StorageError>;

    /// Stream entries matching `query` into `sink`, ordered by timestamp.
    ///
    /// Pushes batches, then the `204` sentinel on completion, or one `500`
    /// message on failure.
    async fn fetch_log(
        &self,
        query: &QueryOption,
        sink: &BatchSink,
    ) -> Result<StreamOutcome, StorageError>;

    /// Release backend resources. Later calls fail.
    async fn close(&self) -> Result<(), StorageError>;
}
