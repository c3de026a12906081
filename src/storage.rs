//! Storage Layer
//!
//! Pluggable log storage behind one async trait:
//! - **Drivers**: backends implementing [`LogDriver`] (SQLite, memory)
//! - **Registry**: every configured driver, exactly one serving queries
//! - **Pool**: bounded connection pool with idle reclamation
//! - **Stream**: batches query rows into a backpressured channel
//!
//! # Components
//!
//! - [`DriverRegistry`]: opens drivers from config, fans writes, serves reads
//! - [`Pool`] / [`PooledConnection`]: connection lifecycle under concurrent load
//! - [`BatchSink`] / [`BatchStream`]: the two ends of a streaming query

pub mod db;
pub mod driver;
mod error;
pub mod pool;
pub mod registry;
mod schema;
pub mod stream;
mod types;

pub use db::{MemoryDriver, SqliteDriver};
pub use driver::LogDriver;
pub use error::StorageError;
pub use pool::{ManageConnection, Pool, PoolBuilder, PoolError, PoolState, PooledConnection};
pub use registry::{DriverKind, DriverRegistry};
pub use stream::{BatchSink, BatchStream, StreamOutcome, batch_channel, stream_batches};
pub use types::{
    BatchMessage, DEFAULT_BATCH_SIZE, Envelope, InputLogPayload, LogEntry, LogLevel,
    OutputLogPayload, QueryOption, TagHistory, code, format_date_key, to_yyyymmdd,
};
