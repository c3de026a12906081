//! Storage driver configuration.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, expand_env_vars};

/// One configured storage driver.
///
/// ```yaml
/// - name: sqlite
///   main_storage: true
///   options:
///     - address=data/hermes.db
///     - maxActiveConn=4
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Backend name, e.g. `sqlite` or `memory`.
    pub name: String,

    /// Whether queries are served from this driver.
    #[serde(default)]
    pub main_storage: bool,

    /// `key=value` option strings.
    #[serde(default)]
    pub options: Vec<String>,
}

impl DriverConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            main_storage: false,
            options: Vec::new(),
        }
    }

    pub fn main_storage(mut self) -> Self {
        self.main_storage = true;
        self
    }

    pub fn option(mut self, key: &str, value: impl std::fmt::Display) -> Self {
        self.options.push(format!("{key}={value}"));
        self
    }

    /// Split every option at its first `=`, expanding `${VAR}` in values.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` for an option without `=` or with an
    /// empty key.
    pub fn parse_options(&self) -> Result<DriverOptions, ConfigError> {
        let mut pairs = Vec::with_capacity(self.options.len());
        for raw in &self.options {
            let (key, value) = raw.split_once('=').ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "driver '{}': invalid option '{raw}', expected key=value",
                    self.name
                ))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "driver '{}': option '{raw}' has an empty key",
                    self.name
                )));
            }
            pairs.push((key.to_string(), expand_env_vars(value.trim())));
        }
        Ok(DriverOptions { pairs })
    }
}

/// Parsed driver options, in declaration order. Keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverOptions {
    pairs: Vec<(String, String)>,
}

impl DriverOptions {
    /// Last value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parse the value for `key`, falling back to `default` when absent.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` if the value does not parse.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e| {
                ConfigError::ValidationError(format!("option {key}='{value}': {e}"))
            }),
        }
    }
}

/// Check the driver list as a whole.
///
/// # Errors
/// `ConfigError::ValidationError` when the list is empty, a name is blank or
/// repeated, an option is malformed, or the number of main-storage drivers
/// is not exactly one.
pub fn validate_drivers(drivers: &[DriverConfig]) -> Result<(), ConfigError> {
    if drivers.is_empty() {
        return Err(ConfigError::ValidationError(
            "no storage driver configured".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for driver in drivers {
        if driver.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "driver name cannot be empty".to_string(),
            ));
        }
        if !names.insert(driver.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate driver name '{}'",
                driver.name
            )));
        }
        driver.parse_options()?;
    }

    match drivers.iter().filter(|d| d.main_storage).count() {
        1 => Ok(()),
        0 => Err(ConfigError::ValidationError(
            "no main storage driver configured".to_string(),
        )),
        n => Err(ConfigError::ValidationError(format!(
            "only one main storage driver is allowed, found {n}"
        ))),
    }
}
