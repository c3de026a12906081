//! Configuration module for Hermes.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Id generator node
//! - Streaming query batching
//! - Storage drivers and their `key=value` options

mod app;
mod driver;
mod validation;

pub use app::{AppConfig, QueryConfig, ServerConfig};
pub use driver::{DriverConfig, DriverOptions, validate_drivers};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::DEFAULT_CHANNEL_CAPACITY;
