//! Driver registry for managing storage driver lifecycle.

use std::str::FromStr;
use std::sync::Arc;

use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::config::{DriverConfig, validate_drivers};
use crate::storage::StorageError;
use crate::storage::db::{MemoryDriver, SqliteDriver};
use crate::storage::driver::LogDriver;

/// Backends known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DriverKind {
    Sqlite,
    Memory,
}

impl DriverKind {
    /// Resolve a configured driver name.
    pub fn from_name(name: &str) -> Result<Self, StorageError> {
        Self::from_str(name.trim()).map_err(|_| {
            let known: Vec<&'static str> = Self::iter().map(|kind| kind.into()).collect();
            StorageError::Config(format!(
                "unknown storage driver '{name}' (supported: {})",
                known.join(", ")
            ))
        })
    }
}

/// Open a single driver from its configuration.
pub async fn open_driver(config: &DriverConfig) -> Result<Arc<dyn LogDriver>, StorageError> {
    let driver: Arc<dyn LogDriver> = match DriverKind::from_name(&config.name)? {
        DriverKind::Sqlite => Arc::new(SqliteDriver::open(config).await?),
        DriverKind::Memory => Arc::new(MemoryDriver::open(config)?),
    };
    Ok(driver)
}

/// Every configured driver, one of them the main storage.
///
/// Built once at startup and read-only afterwards; share it by `Arc`.
pub struct DriverRegistry {
    drivers: Vec<Arc<dyn LogDriver>>,
    main: usize,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .field("main", &self.main().name())
            .finish()
    }
}

impl DriverRegistry {
    /// Validate `configs` and open every driver.
    ///
    /// # Errors
    /// `StorageError::Config` if no driver is configured, the number of
    /// main-storage drivers is not one, a name repeats, or a name is unknown.
    /// Any open failure is returned after closing the drivers opened so far.
    pub async fn open(configs: &[DriverConfig]) -> Result<Self, StorageError> {
        validate_drivers(configs)?;
        let kinds = configs
            .iter()
            .map(|c| DriverKind::from_name(&c.name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut drivers: Vec<Arc<dyn LogDriver>> = Vec::with_capacity(configs.len());
        let mut main = 0;
        for (config, kind) in configs.iter().zip(kinds) {
            match open_driver(config).await {
                Ok(driver) => {
                    if config.main_storage {
                        main = drivers.len();
                    }
                    tracing::info!(driver = %kind, main_storage = config.main_storage, "Driver registered");
                    drivers.push(driver);
                }
                Err(e) => {
                    tracing::error!(driver = %config.name, error = %e, "Failed to open driver");
                    close_all(&drivers).await;
                    return Err(e);
                }
            }
        }

        Ok(Self { drivers, main })
    }

    /// Build a registry from already-open drivers.
    ///
    /// # Errors
    /// `StorageError::Config` if `drivers` is empty, `main` is out of range,
    /// or two drivers share a name.
    pub fn from_drivers(drivers: Vec<Arc<dyn LogDriver>>, main: usize) -> Result<Self, StorageError> {
        if main >= drivers.len() {
            return Err(StorageError::Config(format!(
                "main storage index {main} out of range for {} drivers",
                drivers.len()
            )));
        }
        for (i, driver) in drivers.iter().enumerate() {
            if drivers[..i].iter().any(|d| d.name() == driver.name()) {
                return Err(StorageError::Config(format!(
                    "duplicate driver name '{}'",
                    driver.name()
                )));
            }
        }
        Ok(Self { drivers, main })
    }

    /// The driver serving queries.
    pub fn main(&self) -> &Arc<dyn LogDriver> {
        &self.drivers[self.main]
    }

    /// Every driver, in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn LogDriver>> {
        self.drivers.iter()
    }

    /// Driver by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn LogDriver>> {
        self.drivers.iter().find(|d| d.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Close every driver, logging failures.
    pub async fn close(&self) {
        close_all(&self.drivers).await;
    }
}

async fn close_all(drivers: &[Arc<dyn LogDriver>]) {
    for driver in drivers {
        if let Err(e) = driver.close().await {
            tracing::warn!(driver = %driver.name(), error = %e, "Failed to close driver");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> DriverConfig {
        DriverConfig::new("memory")
    }

    fn expect_config_error(result: Result<DriverRegistry, StorageError>, needle: &str) {
        match result {
            Err(StorageError::Config(msg)) => {
                assert!(msg.contains(needle), "'{msg}' should contain '{needle}'")
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_driver_kind_from_name() {
        assert_eq!(DriverKind::from_name("sqlite").unwrap(), DriverKind::Sqlite);
        assert_eq!(DriverKind::from_name("MEMORY").unwrap(), DriverKind::Memory);
        assert!(DriverKind::from_name("clickhouse").is_err());
        assert_eq!(DriverKind::Sqlite.to_string(), "sqlite");
    }

    #[tokio::test]
    async fn test_open_requires_drivers() {
        expect_config_error(DriverRegistry::open(&[]).await, "no storage driver");
    }

    #[tokio::test]
    async fn test_open_requires_exactly_one_main() {
        expect_config_error(
            DriverRegistry::open(&[memory()]).await,
            "no main storage",
        );

        let dir = tempfile::tempdir().unwrap();
        let sqlite = DriverConfig::new("sqlite")
            .main_storage()
            .option("address", dir.path().join("h.db").display());
        expect_config_error(
            DriverRegistry::open(&[memory().main_storage(), sqlite]).await,
            "only one main storage",
        );
    }

    #[tokio::test]
    async fn test_open_rejects_duplicates_and_unknown() {
        expect_config_error(
            DriverRegistry::open(&[memory().main_storage(), memory()]).await,
            "duplicate driver name",
        );
        expect_config_error(
            DriverRegistry::open(&[DriverConfig::new("clickhouse").main_storage()]).await,
            "unknown storage driver 'clickhouse'",
        );
        expect_config_error(
            DriverRegistry::open(&[DriverConfig::new("mysql").main_storage()]).await,
            "(supported: sqlite, memory)",
        );
    }

    #[tokio::test]
    async fn test_open_failure_is_fatal() {
        // sqlite without an address fails after memory opened.
        expect_config_error(
            DriverRegistry::open(&[memory().main_storage(), DriverConfig::new("sqlite")]).await,
            "missing address",
        );
    }

    #[tokio::test]
    async fn test_open_registers_all_drivers() {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = DriverConfig::new("sqlite")
            .main_storage()
            .option("address", dir.path().join("hermes.db").display());

        let registry = DriverRegistry::open(&[memory(), sqlite]).await.unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.main().name(), "sqlite");
        assert_eq!(registry.names(), vec!["memory", "sqlite"]);
        assert!(registry.get("memory").is_some());
        assert!(registry.get("clickhouse").is_none());
        registry.close().await;
    }

    #[test]
    fn test_from_drivers_validates() {
        let first: Arc<dyn LogDriver> = Arc::new(MemoryDriver::new(10).unwrap());
        let second: Arc<dyn LogDriver> = Arc::new(MemoryDriver::new(10).unwrap());

        assert!(DriverRegistry::from_drivers(vec![Arc::clone(&first)], 1).is_err());
        assert!(DriverRegistry::from_drivers(vec![Arc::clone(&first), second], 0).is_err());

        let registry = DriverRegistry::from_drivers(vec![first], 0).unwrap();
        assert_eq!(registry.main().name(), "memory");
    }
}
