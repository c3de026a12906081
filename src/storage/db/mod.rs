//! Storage backends.
//!
//! - `sqlite`: durable store on a pooled set of `SqliteConnection`s
//! - `memory`: bounded in-process store
//!
//! # Example
//!
//! ```ignore
//! let config = DriverConfig::new("sqlite").option("address", "data/hermes.db");
//! let driver = SqliteDriver::open(&config).await?;
//! let tags = driver.find_all_tags().await?;
//! ```

pub mod memory;
pub mod sqlite;

pub use memory::MemoryDriver;
pub use sqlite::{SqliteConnector, SqliteDriver, SqliteSettings};
