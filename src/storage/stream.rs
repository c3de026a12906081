//! Streaming query engine.
//!
//! Turns an ordered row stream into batches pushed through a bounded
//! channel. The channel capacity is the backpressure knob: a slow consumer
//! blocks the engine instead of growing memory.
//!
//! Message sequence for one query:
//!
//! ```text
//! {200, "OK", [rows]}*  {204, "no content"}     scan completed
//! {200, "OK", [rows]}*  {500, <error>}          scan failed
//! {200, "OK", [rows]}*                          cancelled
//! ```

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::storage::StorageError;
use crate::storage::types::{BatchMessage, Envelope, LogEntry, OutputLogPayload, code};

// =============================================================================
// Channel
// =============================================================================

/// Push failed because the query was cancelled or the consumer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stream cancelled")]
pub struct Cancelled;

/// Producer half of a batch channel.
#[derive(Debug, Clone)]
pub struct BatchSink {
    tx: mpsc::Sender<BatchMessage>,
    cancel: CancellationToken,
}

/// Consumer half of a batch channel.
#[derive(Debug)]
pub struct BatchStream {
    rx: mpsc::Receiver<BatchMessage>,
    cancel: CancellationToken,
}

/// Create a bounded batch channel observing `cancel`.
///
/// A zero capacity is raised to one.
pub fn batch_channel(capacity: usize, cancel: CancellationToken) -> (BatchSink, BatchStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        BatchSink {
            tx,
            cancel: cancel.clone(),
        },
        BatchStream { rx, cancel },
    )
}

impl BatchSink {
    /// Push one message, waiting while the channel is full.
    ///
    /// # Errors
    /// [`Cancelled`] if the token fires or the consumer is dropped first.
    pub async fn push(&self, message: BatchMessage) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled),
            sent = self.tx.send(message) => sent.map_err(|_| Cancelled),
        }
    }

    /// Whether pushing can no longer succeed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the token fires or the consumer is dropped.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }
}

impl BatchStream {
    /// Next message, or `None` once cancelled or every sink is gone.
    pub async fn recv(&mut self) -> Option<BatchMessage> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            message = self.rx.recv() => message,
        }
    }

    /// Cancel the query feeding this stream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Terminal state of [`stream_batches`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Every row was delivered and the sentinel pushed.
    Completed { rows: usize, batches: usize },
    /// A row error was reported to the consumer.
    Failed,
    /// Stopped without further messages.
    Cancelled,
}

/// Drain `rows` into `sink` as batches of at most `batch_size` rows.
///
/// Rows must arrive in the order the consumer should see them. A zero
/// `batch_size` is treated as one.
pub async fn stream_batches<S>(rows: S, batch_size: usize, sink: &BatchSink) -> StreamOutcome
where
    S: Stream<Item = Result<LogEntry, StorageError>>,
{
    let batch_size = batch_size.max(1);
    let mut rows = std::pin::pin!(rows);
    let mut batch: Vec<OutputLogPayload> = Vec::with_capacity(batch_size);
    let mut total = 0usize;
    let mut batches = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = sink.cancelled() => return StreamOutcome::Cancelled,
            next = rows.next() => next,
        };

        match next {
            Some(Ok(entry)) => {
                total += 1;
                batch.push(entry.into());
                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if sink.push(Envelope::ok(full)).await.is_err() {
                        return StreamOutcome::Cancelled;
                    }
                    batches += 1;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, rows = total, "Query scan failed");
                if sink
                    .push(Envelope::error(code::INTERNAL_ERROR, e.to_string()))
                    .await
                    .is_err()
                {
                    return StreamOutcome::Cancelled;
                }
                return StreamOutcome::Failed;
            }
            None => break,
        }
    }

    if !batch.is_empty() {
        if sink.push(Envelope::ok(batch)).await.is_err() {
            return StreamOutcome::Cancelled;
        }
        batches += 1;
    }
    if sink.push(Envelope::no_content()).await.is_err() {
        return StreamOutcome::Cancelled;
    }

    tracing::debug!(rows = total, batches, "Query stream completed");
    StreamOutcome::Completed {
        rows: total,
        batches,
    }
}
