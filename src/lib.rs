//! Hermes - Tagged Log Collector
//!
//! This crate provides the core functionality for the Hermes log collector.
//! It can be used as a library by other Rust projects, or run as a standalone
//! binary with the `hermes` executable.
//!
//! # Architecture
//!
//! - **Ingestion**: newline-delimited JSON logs, stamped with snowflake ids
//!   and fanned out to every storage driver
//! - **Storage**: pluggable drivers (SQLite, memory) behind [`storage::LogDriver`],
//!   one of them the main storage serving reads
//! - **Pool**: bounded connection pool with idle reclamation
//! - **Streaming**: tag/level/time queries delivered as batches over a WebSocket
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hermes::{AppConfig, DriverRegistry, IdGenerator, Ingestor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load("configs/config.yaml")?;
//!     let registry = Arc::new(DriverRegistry::open(&config.drivers).await?);
//!     let ingestor = Ingestor::new(Arc::clone(&registry), Arc::new(IdGenerator::new(1)?));
//!
//!     ingestor.ingest("app1", r#"{"message":"hello","level":"info"}"#).await;
//!     println!("{:?}", registry.main().find_all_tags().await?);
//!
//!     registry.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod id;
pub mod ingest;
pub mod server;
pub mod storage;

pub use config::{AppConfig, ConfigError, DriverConfig};
pub use id::{IdError, IdGenerator};
pub use ingest::{IngestReport, Ingestor};
pub use storage::{
    DriverRegistry, LogDriver, LogEntry, LogLevel, QueryOption, StorageError,
};
