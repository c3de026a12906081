//! Application configuration structures.

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::id::MAX_NODE_ID;
use crate::storage::DEFAULT_BATCH_SIZE;

use super::driver::{DriverConfig, validate_drivers};
use super::validation::ConfigError;

// =============================================================================
// Constants
// =============================================================================

/// Default number of batches buffered per streaming query.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_drivers() -> Vec<DriverConfig> {
    vec![
        DriverConfig::new("sqlite")
            .main_storage()
            .option("address", "data/hermes.db"),
    ]
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8080).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// =============================================================================
// Query Configuration
// =============================================================================

/// Streaming query settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Rows per streamed batch (default: 500).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches buffered between engine and consumer (default: 16).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Id generator node, `0..=1023` (default: 0).
    #[serde(default)]
    pub node_id: i64,

    /// Streaming query configuration.
    #[serde(default)]
    pub query: QueryConfig,

    /// Storage drivers; exactly one is the main storage.
    #[serde(default = "default_drivers")]
    pub drivers: Vec<DriverConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            node_id: 0,
            query: QueryConfig::default(),
            drivers: default_drivers(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server bind address
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        if !(0..=MAX_NODE_ID).contains(&self.node_id) {
            return Err(ConfigError::ValidationError(format!(
                "node_id must be within 0..={MAX_NODE_ID}, got {}",
                self.node_id
            )));
        }

        if self.query.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "query batch_size must be positive".to_string(),
            ));
        }

        if self.query.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "query channel_capacity must be positive".to_string(),
            ));
        }

        validate_drivers(&self.drivers)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.query.batch_size, 500);
        assert_eq!(config.query.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
server:
  bind: 127.0.0.1
  port: 9090
node_id: 7
query:
  batch_size: 100
drivers:
  - name: sqlite
    main_storage: true
    options:
      - address=/tmp/hermes.db
  - name: memory
    options:
      - capacity=1000
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.node_id, 7);
        assert_eq!(config.query.batch_size, 100);
        assert_eq!(config.query.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.drivers.len(), 2);
        assert!(config.drivers[0].main_storage);
        assert!(!config.drivers[1].main_storage);
    }

    #[test]
    fn test_load_rejects_bad_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "server: [not, a, map]").unwrap();

        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load("/nonexistent/hermes.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_config_validation_invalid_port() {
        let config = AppConfig {
            server: ServerConfig {
                bind: "0.0.0.0".to_string(),
                port: 0,
            },
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_bind_address() {
        let config = AppConfig {
            server: ServerConfig {
                bind: "not-an-ip".to_string(),
                port: 8080,
            },
            ..Default::default()
        };

        let result = config.validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("invalid server bind address")
        );
    }

    #[test]
    fn test_config_validation_node_id_range() {
        let config = AppConfig {
            node_id: 1024,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("node_id"));

        let config = AppConfig {
            node_id: -1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_query_sizes() {
        let config = AppConfig {
            query: QueryConfig {
                batch_size: 0,
                channel_capacity: 16,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            query: QueryConfig {
                batch_size: 10,
                channel_capacity: 0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_requires_one_main() {
        let config = AppConfig {
            drivers: vec![DriverConfig::new("memory")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
