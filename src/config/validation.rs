//! Configuration errors and value helpers shared by the config types.

use std::time::Duration;

use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse a humantime duration such as `5m` or `1h30m`.
///
/// # Examples
///
/// ```
/// use hermes::config::parse_duration;
///
/// assert_eq!(parse_duration("5m").unwrap().as_secs(), 300);
/// assert_eq!(parse_duration("1h30m").unwrap().as_secs(), 5400);
/// assert!(parse_duration("soon").is_err());
/// ```
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::ValidationError("empty duration".to_string()));
    }
    humantime::parse_duration(trimmed)
        .map_err(|e| ConfigError::ValidationError(format!("invalid duration '{trimmed}': {e}")))
}

/// Substitute `${VAR}` and `${VAR:-default}` with environment values.
///
/// An unset variable without a default becomes the empty string.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let pattern = ENV_VAR.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var pattern is valid")
    });

    pattern
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1])
                .unwrap_or_else(|_| caps.get(2).map_or("", |m| m.as_str()).to_string())
        })
        .into_owned()
}
